mod common;

use std::path::Path;
use std::sync::Arc;

use common::{ack_frame, data_frame, rolling, settings, t0, CallLog, MockPlatform, MockRtc, MockWatchdog};
use glacier_logger::duty::events::EventFlags;
use glacier_logger::duty::{
    numbered_session_name, session_name, DutyCycleController, DutyCycleState, Peripherals,
};
use glacier_logger::hal::file_storage::{FileStorage, JOURNAL_FILE};
use glacier_logger::hal::replay::ReplayTransport;
use glacier_logger::hal::Storage;
use glacier_logger::ubx::parser::FrameParser;
use tempfile::TempDir;

type FileController =
    DutyCycleController<ReplayTransport, FileStorage, MockRtc, MockWatchdog, MockPlatform>;

fn file_controller(root: &Path, capture: Vec<u8>, events: &Arc<EventFlags>) -> FileController {
    let log: CallLog = Arc::default();
    let hw = Peripherals {
        transport: ReplayTransport::new(capture, 128),
        storage: FileStorage::new(root),
        rtc: MockRtc::new(log.clone()),
        watchdog: MockWatchdog { log: log.clone() },
        platform: MockPlatform {
            log,
            ms: Arc::default(),
            low_voltage: Arc::default(),
        },
    };
    DutyCycleController::new(settings(rolling()), hw, Arc::clone(events))
}

#[test]
fn replayed_window_lands_on_disk_without_acks() {
    let dir = TempDir::new().unwrap();

    let frames = [data_frame(700), data_frame(90), data_frame(333)];
    let mut capture = b"\xff\x00noise".to_vec();
    capture.extend(&frames[0]);
    capture.extend(ack_frame(10));
    capture.extend(&frames[1]);
    capture.extend(&frames[2]);

    let events = Arc::new(EventFlags::new());
    let mut c = file_controller(dir.path(), capture, &events);
    c.start();
    while !c.peripherals().transport.is_exhausted() {
        assert_eq!(c.step(), None);
    }
    events.raise_alarm();
    c.step();
    assert_eq!(c.state(), DutyCycleState::Dormant);

    let name = session_name(t0());
    let written = std::fs::read(dir.path().join(&name)).unwrap();
    let expected: Vec<u8> = frames.concat();
    assert_eq!(written, expected);

    let mut parser = FrameParser::new();
    let reparsed = parser.push(&written);
    assert_eq!(reparsed.len(), 3);
    assert_eq!(parser.noise_bytes(), 0);

    let journal = c.peripherals().storage.read_journal().unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].name, name);
    assert!(journal[0].logging_online);
    assert_eq!(journal[0].metrics.frames_valid, 4);
    assert_eq!(journal[0].metrics.acks_discarded, 1);
    assert_eq!(journal[0].metrics.bytes_written, expected.len() as u64);
}

#[test]
fn reopening_a_session_appends() {
    let dir = TempDir::new().unwrap();
    let mut storage = FileStorage::new(dir.path());
    let name = "20240301/20240301_120000.ubx";

    let mut h = storage.open(name).unwrap();
    storage.write(&mut h, b"abc").unwrap();
    storage.flush(&mut h).unwrap();
    assert_eq!(h.path(), dir.path().join(name).as_path());
    storage.close(h).unwrap();

    let mut h = storage.open(name).unwrap();
    storage.write(&mut h, b"def").unwrap();
    storage.close(h).unwrap();
    assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), b"abcdef");
}

#[test]
fn journal_skips_damaged_lines() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::new(dir.path());
    assert!(storage.read_journal().unwrap().is_empty());

    let (mut c, rig) = common::rig(settings(rolling()));
    c.start();
    rig.events.raise_alarm();
    c.step();
    let summary = rig.storage.summaries.lock().unwrap()[0].clone();

    let mut storage = FileStorage::new(dir.path());
    storage.record_summary(&summary).unwrap();
    let mut text = std::fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
    text.push_str("{not json\n\n");
    std::fs::write(dir.path().join(JOURNAL_FILE), text).unwrap();
    storage.record_summary(&summary).unwrap();

    let journal = storage.read_journal().unwrap();
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[1].name, summary.name);
}

#[test]
fn existing_session_file_is_never_appended_to() {
    let dir = TempDir::new().unwrap();
    let name = session_name(t0());
    std::fs::create_dir_all(dir.path().join("20240301")).unwrap();
    std::fs::write(dir.path().join(&name), b"earlier run").unwrap();
    assert!(FileStorage::new(dir.path()).exists(&name));

    let events = Arc::new(EventFlags::new());
    let mut c = file_controller(dir.path(), data_frame(40), &events);
    c.start();
    assert_eq!(c.session_name(), Some("20240301/20240301_120000_1.ubx"));
    while !c.peripherals().transport.is_exhausted() {
        c.step();
    }
    events.raise_stop();
    c.step();

    assert_eq!(std::fs::read(dir.path().join(&name)).unwrap(), b"earlier run");
    let fresh = std::fs::read(dir.path().join(numbered_session_name(t0(), 1))).unwrap();
    assert_eq!(fresh, data_frame(40));
}
