use std::sync::Arc;

use anyhow::Result;

use aimpoint::camera::{CameraGeometry, CameraId, CameraIntrinsics};
use aimpoint::ingest::VideoMode;
use aimpoint::settings::{PipelineSettings, PipelineType};
use aimpoint::store::{CameraMetadata, JsonDirSettingsStore, SettingsStore, StoredPipelines};
use aimpoint::{PipelineContext, PipelineManager, PipelineSelector};

fn context() -> Result<PipelineContext> {
    Ok(PipelineContext::new(CameraGeometry::new(70.0, 160, 120)?))
}

#[test]
fn missing_camera_loads_as_none() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonDirSettingsStore::open(dir.path().join("settings"))?;
    let camera = CameraId::new("front");
    assert!(store.load_pipelines(&camera)?.is_none());
    assert!(store.load_camera(&camera)?.is_none());
    Ok(())
}

#[test]
fn pipelines_survive_a_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let camera = CameraId::new("Shooter Cam");
    let mut goal = PipelineSettings::named("Goal");
    goal.hsv_lower = [60, 120, 80];
    goal.erode = true;
    let mut cones = PipelineSettings::named("Cones");
    cones.pipeline_type = PipelineType::ObjectDetection;
    cones.detector = Some("color_blob".into());
    let stored = StoredPipelines {
        pipelines: vec![goal, cones],
        current_index: 1,
        ..StoredPipelines::default()
    };

    JsonDirSettingsStore::open(dir.path())?.save_pipelines(&camera, &stored)?;
    let reopened = JsonDirSettingsStore::open(dir.path())?;
    assert_eq!(reopened.load_pipelines(&camera)?, Some(stored));

    let camera_dir = dir.path().join("shooter_cam");
    assert!(camera_dir.join("pipelines.json").exists());
    assert!(!camera_dir.join("pipelines.json.tmp").exists());
    Ok(())
}

#[test]
fn camera_metadata_round_trips() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonDirSettingsStore::open(dir.path())?;
    let camera = CameraId::new("front");
    let metadata = CameraMetadata {
        name: "Front".into(),
        diagonal_fov: 70.0,
        video_mode: Some(VideoMode::default()),
        intrinsics: Some(CameraIntrinsics {
            fx: 512.0,
            fy: 512.0,
            cx: 319.5,
            cy: 239.5,
            distortion: [0.125, -0.25, 0.0, 0.0, 0.0],
        }),
    };
    store.save_camera(&camera, &metadata)?;
    assert_eq!(store.load_camera(&camera)?, Some(metadata));
    Ok(())
}

#[test]
fn partial_files_fill_in_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let camera = CameraId::new("front");
    std::fs::create_dir_all(dir.path().join("front"))?;
    std::fs::write(
        dir.path().join("front/pipelines.json"),
        r#"{ "pipelines": [ { "name": "Only", "erode": true } ] }"#,
    )?;

    let stored = JsonDirSettingsStore::open(dir.path())?
        .load_pipelines(&camera)?
        .expect("stored pipelines");
    assert_eq!(stored.current_index, 0);
    assert_eq!(stored.pipelines[0].name, "Only");
    assert!(stored.pipelines[0].erode);
    assert_eq!(stored.pipelines[0].morphology_kernel, 7);
    assert!(stored.driver_mode.crosshair);
    Ok(())
}

#[test]
fn corrupt_store_falls_back_to_default_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let camera = CameraId::new("front");
    std::fs::create_dir_all(dir.path().join("front"))?;
    std::fs::write(dir.path().join("front/pipelines.json"), "{ truncated")?;

    let store: Arc<dyn SettingsStore> = Arc::new(JsonDirSettingsStore::open(dir.path())?);
    assert!(store.load_pipelines(&camera).is_err());

    let manager = PipelineManager::load(camera.clone(), context()?, Arc::clone(&store))?;
    assert_eq!(manager.names(), vec!["Default"]);
    assert_eq!(manager.selector(), PipelineSelector::Detection(0));

    // The fallback is written back, replacing the corrupt file.
    let repaired = store.load_pipelines(&camera)?.expect("repaired store");
    assert_eq!(repaired.pipelines.len(), 1);
    Ok(())
}

#[test]
fn manager_mutations_persist_across_restarts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let camera = CameraId::new("front");
    {
        let store: Arc<dyn SettingsStore> = Arc::new(JsonDirSettingsStore::open(dir.path())?);
        let mut manager = PipelineManager::load(camera.clone(), context()?, store)?;
        let copy = manager.duplicate_pipeline(0)?;
        manager.rename_pipeline(copy, "Goal")?;
        manager.set_current(PipelineSelector::Detection(copy))?;
        manager.set_driver_mode(true)?;
    }

    let store: Arc<dyn SettingsStore> = Arc::new(JsonDirSettingsStore::open(dir.path())?);
    let manager = PipelineManager::load(camera, context()?, store)?;
    assert_eq!(manager.names(), vec!["Default", "Goal"]);
    assert_eq!(manager.selector(), PipelineSelector::Detection(1));
    Ok(())
}
