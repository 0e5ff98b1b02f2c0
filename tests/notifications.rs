use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};

use cctv_sentinel::config::{MqttSettings, NotificationSettings};
use cctv_sentinel::notify::build_notifiers;
use cctv_sentinel::{
    BoundingBox, CameraConfig, CooldownTracker, DetectedObject, DetectionType, EventRecord,
    EventStore, Frame, FrameProcessor, NotificationDispatcher, Notifier, StubBackend,
};

struct Capture {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl Notifier for Capture {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn notify(&self, record: &EventRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct Broken;

impl Notifier for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn notify(&self, _record: &EventRecord) -> Result<()> {
        Err(anyhow!("connection reset by peer"))
    }
}

#[test]
fn committed_events_reach_notifiers_and_survive_failures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let records = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Arc::new(NotificationDispatcher::spawn(vec![
        Box::new(Broken),
        Box::new(Capture {
            records: Arc::clone(&records),
        }),
    ]));
    let store =
        Arc::new(EventStore::open(dir.path(), 85)?.with_dispatcher(Arc::clone(&dispatcher)));

    let processor = FrameProcessor::new(
        CameraConfig::new("Side Gate", "stub://side"),
        Arc::new(StubBackend::with_detections(vec![
            DetectedObject::new("person", 0.9, BoundingBox::new(2, 2, 20, 30)?),
            DetectedObject::new("bus", 0.8, BoundingBox::new(25, 5, 60, 40)?),
        ])),
        Arc::new(CooldownTracker::default()),
        Arc::clone(&store),
    );
    let outcome = processor.process(&Frame::filled(64, 48, [0, 0, 0])?, SystemTime::now());
    assert_eq!(outcome.emitted.len(), 2);

    assert!(dispatcher.shutdown(Duration::from_secs(5)));
    let delivered = records.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].detection_type, DetectionType::Person);
    assert_eq!(delivered[1].detection_type, DetectionType::Vehicle);

    let stats = dispatcher.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.failed, 2);

    for (_, artifact) in &outcome.emitted {
        assert!(artifact.image_path.exists());
        assert!(artifact.metadata_path.exists());
    }
    Ok(())
}

#[test]
fn builds_only_enabled_notifiers() {
    let settings = NotificationSettings {
        email: None,
        mqtt: None,
        console: true,
    };
    let names: Vec<_> = build_notifiers(&settings).iter().map(|n| n.name()).collect();
    assert_eq!(names, vec!["console"]);

    let settings = NotificationSettings {
        email: None,
        mqtt: Some(MqttSettings {
            broker_addr: "mqtt://".to_string(),
            topic: "sentinel/events".to_string(),
            client_id: "test".to_string(),
            username: None,
            password: None,
        }),
        console: false,
    };
    assert!(build_notifiers(&settings).is_empty());
}
