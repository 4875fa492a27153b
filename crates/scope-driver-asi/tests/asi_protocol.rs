//! Protocol tests against a scripted controller on an in-memory duplex link.

use scope_core::capabilities::{DiscretePositioner, HasErrorText, HasProperties, XyMovable};
use scope_core::serial::{wrap_shared, SharedPort};
use scope_driver_asi::error::{ERR_ASICODE_OFFSET, ERR_FILTER_WHEEL_SPINNING};
use scope_driver_asi::{AsiError, AsiFilterWheel, AsiHub, AsiXyStage, XyStageSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

const FIRMWARE: [(&str, Option<&str>); 2] = [
    ("V", Some(":A Version: USB-9.2n")),
    ("BU", Some(":A TIGER_COMM")),
];

/// Controller that expects `script` commands in order and answers each.
///
/// `None` leaves the command unanswered. Returns the commands it saw once
/// the host side of the link is dropped.
fn controller(script: Vec<(&'static str, Option<&'static str>)>) -> (SharedPort, JoinHandle<Vec<String>>) {
    let (host, device) = tokio::io::duplex(1024);
    let port = wrap_shared(Box::new(host));

    let task = tokio::spawn(async move {
        let mut device = BufReader::new(device);
        let mut seen = Vec::new();
        let mut steps = script.into_iter();
        loop {
            let mut buf = Vec::new();
            match device.read_until(b'\r', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = String::from_utf8_lossy(&buf)
                .trim_end_matches('\r')
                .to_string();
            let (expected, reply) = steps
                .next()
                .unwrap_or_else(|| panic!("unexpected command '{command}'"));
            assert_eq!(command, expected);
            seen.push(command);
            if let Some(reply) = reply {
                device
                    .get_mut()
                    .write_all(format!("{reply}\r\n").as_bytes())
                    .await
                    .unwrap();
            }
        }
        seen
    });

    (port, task)
}

fn with_firmware(rest: &[(&'static str, Option<&'static str>)]) -> Vec<(&'static str, Option<&'static str>)> {
    FIRMWARE.iter().chain(rest).copied().collect()
}

fn hub(port: SharedPort) -> Arc<AsiHub> {
    Arc::new(AsiHub::new("Tiger", port, Duration::from_millis(200)))
}

// =============================================================================
// Hub
// =============================================================================

#[tokio::test]
async fn hub_reads_firmware_once() {
    let (port, task) = controller(with_firmware(&[]));
    let hub = hub(port);

    hub.initialize().await.unwrap();
    hub.initialize().await.unwrap();

    let firmware = hub.firmware();
    assert_eq!(firmware.version, 9.2);
    assert_eq!(firmware.build, "TIGER_COMM");
    assert_eq!(hub.get_property("FirmwareBuild").unwrap(), "TIGER_COMM");

    drop(hub);
    assert_eq!(task.await.unwrap(), vec!["V", "BU"]);
}

#[tokio::test]
async fn controller_rejection_maps_to_offset_code() {
    let (port, task) = controller(vec![("M Q=1", Some(":N-2"))]);
    let hub = hub(port);

    let err = hub.command("M Q=1").await.unwrap_err();
    assert!(matches!(err, AsiError::Controller { code: -2 }));
    assert_eq!(err.code(), ERR_ASICODE_OFFSET + 2);
    assert_eq!(hub.error_text(err.code()), Some("unrecognized axis parameter"));

    drop(hub);
    task.await.unwrap();
}

#[tokio::test]
async fn unanswered_command_times_out() {
    let (port, task) = controller(vec![("V", None)]);
    let hub = Arc::new(AsiHub::new("Tiger", port, Duration::from_millis(30)));

    let err = hub.command("V").await.unwrap_err();
    assert!(matches!(err, AsiError::Timeout { ref command, .. } if command == "V"));

    drop(hub);
    task.await.unwrap();
}

#[tokio::test]
async fn closed_link_is_io_error() {
    let (port, task) = controller(vec![]);
    let hub = hub(port);

    // Controller panics on the unexpected command and drops its end.
    let err = hub.exchange("V").await.unwrap_err();
    assert!(matches!(err, AsiError::Io(_)));
    assert!(task.await.is_err());
}

// =============================================================================
// XY stage
// =============================================================================

#[tokio::test]
async fn stage_moves_in_tenths_of_micrometres() {
    let (port, task) = controller(with_firmware(&[
        ("W X Y", Some(":A 0 0")),
        ("M X=1250.0 Y=-300.0", Some(":A")),
        ("W X Y", Some(":A 1250 -300")),
        ("R X=1.0 Y=0.0", Some(":A")),
    ]));
    let stage = AsiXyStage::new("XY", hub(port), XyStageSettings::default()).unwrap();

    stage.initialize().await.unwrap();
    stage.move_abs(125.0, -30.0).await.unwrap();
    assert_eq!(stage.position().await.unwrap(), (125.0, -30.0));
    stage.move_rel(0.1, 0.0).await.unwrap();

    drop(stage);
    assert_eq!(task.await.unwrap().len(), 6);
}

#[tokio::test]
async fn stage_commands_carry_card_address() {
    let (port, task) = controller(with_firmware(&[
        ("2W Z F", Some(":A 10 20")),
        ("2! Z F", Some(":A")),
        ("2\\", Some(":A")),
        ("2H Z=0 F=0", Some(":A")),
    ]));
    let settings = XyStageSettings {
        axis_x: 'Z',
        axis_y: 'F',
        address: "2".to_string(),
        ..Default::default()
    };
    let stage = AsiXyStage::new("XY", hub(port), settings).unwrap();

    stage.initialize().await.unwrap();
    stage.home().await.unwrap();
    stage.stop().await.unwrap();
    stage.set_origin().await.unwrap();

    assert_eq!(stage.get_property("CardAddress").unwrap(), "2");
    drop(stage);
    task.await.unwrap();
}

#[tokio::test]
async fn stage_position_needs_two_values() {
    let (port, task) = controller(with_firmware(&[("W X Y", Some(":A 5"))]));
    let stage = AsiXyStage::new("XY", hub(port), XyStageSettings::default()).unwrap();

    let err = stage.initialize().await.unwrap_err();
    assert!(matches!(err, AsiError::NotEnoughAxes(_)));

    drop(stage);
    task.await.unwrap();
}

#[tokio::test]
async fn wait_settled_polls_until_idle() {
    let (port, task) = controller(vec![
        ("/", Some("B")),
        ("/", Some("B")),
        ("/", Some("N")),
    ]);
    let settings = XyStageSettings {
        settle_poll_ms: 1,
        ..Default::default()
    };
    let stage = AsiXyStage::new("XY", hub(port), settings).unwrap();

    stage.wait_settled().await.unwrap();

    drop(stage);
    assert_eq!(task.await.unwrap().len(), 3);
}

#[tokio::test]
async fn wait_settled_gives_up_after_timeout() {
    let (port, task) = controller(vec![("/", Some("B")); 64]);
    let settings = XyStageSettings {
        settle_poll_ms: 5,
        settle_timeout_ms: 20,
        ..Default::default()
    };
    let stage = AsiXyStage::new("XY", hub(port), settings).unwrap();

    let err = stage.wait_until_idle().await.unwrap_err();
    assert!(matches!(err, AsiError::Timeout { .. }));

    drop(stage);
    task.await.unwrap();
}

// =============================================================================
// Filter wheel
// =============================================================================

fn wheel(port: SharedPort, number: u8) -> AsiFilterWheel {
    AsiFilterWheel::new("Wheel", hub(port), "", number, 8).unwrap()
}

#[tokio::test]
async fn wheel_initializes_and_moves() {
    let (port, task) = controller(with_firmware(&[
        ("FW 0", Some("0")),
        ("MP", Some("3")),
        ("FW 0", Some("0")),
        ("?", Some("0")),
        ("FW 0", Some("0")),
        ("MP 5", Some("5")),
        ("FW 0", Some("0")),
        ("MP", Some("5")),
    ]));
    let wheel = wheel(port, 0);

    wheel.initialize().await.unwrap();
    assert_eq!(wheel.get_property("Position").unwrap(), "3");

    wheel.move_to(5).await.unwrap();
    assert_eq!(wheel.get_property("Position").unwrap(), "5");
    assert_eq!(wheel.position().await.unwrap(), 5);
    assert_eq!(wheel.position_count(), 8);

    drop(wheel);
    assert_eq!(task.await.unwrap().len(), 10);
}

#[tokio::test]
async fn wheel_refuses_to_move_while_spinning() {
    let (port, task) = controller(with_firmware(&[
        ("FW 1", Some("1")),
        ("MP", Some("0")),
        ("FW 1", Some("1")),
        ("?", Some("1")),
    ]));
    let wheel = wheel(port, 1);

    wheel.initialize().await.unwrap();
    let err = wheel.select(2).await.unwrap_err();
    assert!(matches!(err, AsiError::FilterWheelSpinning));
    assert_eq!(err.code(), ERR_FILTER_WHEEL_SPINNING);

    drop(wheel);
    task.await.unwrap();
}

#[tokio::test]
async fn wheel_rejects_positions_without_sending() {
    let (port, task) = controller(with_firmware(&[
        ("FW 0", Some("0")),
        ("MP", Some("1")),
    ]));
    let wheel = wheel(port, 0);

    wheel.initialize().await.unwrap();
    assert!(matches!(
        wheel.select(8).await,
        Err(AsiError::InvalidPosition {
            position: 8,
            count: 8
        })
    ));
    assert!(wheel.set_property("Position", "9").await.is_err());
    assert_eq!(wheel.get_property("Position").unwrap(), "1");

    drop(wheel);
    assert_eq!(task.await.unwrap().len(), 4);
}

#[tokio::test]
async fn wheel_missing_selection_echo_is_not_ready() {
    let (port, task) = controller(with_firmware(&[("FW 1", Some("0")), ("MP", Some("0"))]));
    let wheel = wheel(port, 1);

    let err = wheel.initialize().await.unwrap_err();
    assert!(matches!(err, AsiError::FilterWheelNotReady));
    assert!(!wheel.is_initialized());

    drop(wheel);
    task.await.unwrap();
}

#[tokio::test]
async fn wheel_requires_initialize() {
    let (port, task) = controller(vec![]);
    let wheel = wheel(port, 0);

    assert!(matches!(
        wheel.select(1).await,
        Err(AsiError::FilterWheelNotReady)
    ));
    assert!(matches!(
        wheel.current_position().await,
        Err(AsiError::FilterWheelNotReady)
    ));

    drop(wheel);
    assert!(task.await.unwrap().is_empty());
}
