use std::sync::Mutex;
use std::time::Duration;

use tempfile::{tempdir, NamedTempFile};

use person_detection::config::{PipelineConfig, SinkKind};
use person_detection::{load_engine, InferenceEngine};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PERSON_DETECTION_CONFIG",
        "PERSON_DETECTION_CAMERA_ID",
        "PERSON_DETECTION_MODEL_DIR",
        "PERSON_DETECTION_MODEL_FILE",
        "PERSON_DETECTION_ASSET_NAME",
        "PERSON_DETECTION_STREAM_ADDR",
        "PERSON_DETECTION_MIN_CONF",
        "PERSON_DETECTION_ENABLE_WINDOW",
        "PERSON_DETECTION_SINK",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let readings_path = file.path().with_extension("jsonl");
    let json = format!(
        r#"{{
            "camera": {{ "id": "/dev/video2", "width": 1280, "height": 720, "target_fps": 15 }},
            "model": {{ "dir": "/opt/models", "model_file": "ssd.onnx", "floating": true }},
            "detection": {{ "min_conf_threshold": 0.6, "input_mean": 127.5, "input_std": 127.5 }},
            "output": {{ "asset_name": "front_door", "stream_addr": "127.0.0.1:9090", "shutdown_grace_ms": 500 }},
            "sink": {{ "kind": "jsonl", "path": "{}" }}
        }}"#,
        readings_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PERSON_DETECTION_CONFIG", file.path());
    std::env::set_var("PERSON_DETECTION_ASSET_NAME", "back_door");
    std::env::set_var("PERSON_DETECTION_MIN_CONF", "0.75");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.camera.id, "/dev/video2");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.model.model_path().to_str(), Some("/opt/models/ssd.onnx"));
    assert_eq!(
        cfg.model.labels_path().to_str(),
        Some("/opt/models/coco_labels.txt")
    );
    assert!(cfg.model.floating);
    assert_eq!(cfg.detection.min_conf_threshold, 0.75);
    assert_eq!(cfg.output.asset_name, "back_door");
    assert_eq!(cfg.output.stream_addr.as_deref(), Some("127.0.0.1:9090"));
    assert_eq!(cfg.output.shutdown_grace, Duration::from_millis(500));
    assert_eq!(cfg.sink.kind, SinkKind::JsonLines);
    assert_eq!(cfg.sink.path.as_deref(), Some(readings_path.as_path()));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load defaults");
    assert_eq!(cfg.camera.id, "0");
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.detection.min_conf_threshold, 0.5);
    assert_eq!(cfg.detection.target_class, 0);
    assert_eq!(cfg.output.asset_name, "person_detection");
    assert_eq!(cfg.output.shutdown_grace, Duration::from_secs(3));
    assert_eq!(cfg.sink.kind, SinkKind::Log);
}

#[test]
fn env_can_disable_preview_and_switch_sink() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PERSON_DETECTION_STREAM_ADDR", "");
    std::env::set_var("PERSON_DETECTION_SINK", "mqtt");
    std::env::set_var("PERSON_DETECTION_ENABLE_WINDOW", "yes");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.output.stream_addr, None);
    assert_eq!(cfg.sink.kind, SinkKind::Mqtt);
    assert!(cfg.output.enable_window);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PERSON_DETECTION_MIN_CONF", "1.5");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("PERSON_DETECTION_MIN_CONF", "high");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("PERSON_DETECTION_SINK", "kafka");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"camera": {"width": 0}}"#).expect("write config");
    assert!(PipelineConfig::load_from(Some(file.path())).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"sink": {"kind": "carrier-pigeon"}}"#)
        .expect("write config");
    assert!(PipelineConfig::load_from(Some(file.path())).is_err());

    clear_env();
}

#[test]
fn missing_labels_file_fails_engine_load() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().expect("temp dir");
    let mut cfg = PipelineConfig::load().expect("load defaults");
    cfg.model.dir = dir.path().to_path_buf();
    cfg.model.model_file = "stub://ssd".to_string();

    let err = load_engine(&cfg).err().expect("labels are required");
    assert!(format!("{err:#}").contains("labels"));

    std::fs::write(dir.path().join("coco_labels.txt"), "0 person\n1 bicycle\n")
        .expect("write labels");
    let engine = load_engine(&cfg).expect("stub engine");
    assert_eq!(engine.name(), "stub");
    assert_eq!(engine.labels().get(0), Some("person"));
    assert_eq!(engine.input_width(), 300);
    assert_eq!(engine.min_conf_threshold(), 0.5);
}
