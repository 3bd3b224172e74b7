//! Saver layout, enlargeable arrays and persistence through the tree engine.

use modaq_io::data::{Axis, DType, DataToExport, DataWithAxes, DwaKind, NdArray};
use modaq_io::h5::{
    AttrValue, BackendKind, DataLogger, DataSaver, FileMode, GroupType, H5Backend, H5Saver,
    Metadata, SaveType,
};
use modaq_io::ModaqError;
use tempfile::tempdir;

#[test]
fn test_scan_index_survives_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("scans.h5");
    {
        let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Scan)?;
        saver.init_file(&path, true, &Metadata::new())?;
        for _ in 0..3 {
            saver.add_scan_group(None, "", "", &Metadata::new())?;
        }
        let raw = saver.raw_group()?.clone();
        assert_eq!(
            saver.children_name(&raw)?,
            vec!["Logger", "Scan000", "Scan001", "Scan002"]
        );
        saver.close_file()?;
    }

    let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Scan)?;
    let created = saver.init_file(&path, false, &Metadata::new())?;
    assert!(!created);
    assert_eq!(saver.get_scan_index()?, 2);
    let next = saver.add_scan_group(None, "", "", &Metadata::new())?;
    assert_eq!(next.name(), "Scan003");
    Ok(())
}

#[test]
fn test_earray_grows_by_rows() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut backend = H5Backend::new(BackendKind::Tree)?;
    let root = backend.open_file(dir.path().join("rows.dat"), FileMode::Write, "rows")?;
    let array = backend.create_earray(&root, "frames", DType::Float32, &[10, 3], "frames")?;

    for frame in 0..5 {
        let values: Vec<f32> = (0..30).map(|i| (frame * 30 + i) as f32).collect();
        backend.append(&array, &NdArray::from_shape_vec(&[10, 3], values)?)?;
    }

    let stored = backend.read_array(&array)?;
    assert_eq!(stored.shape(), &[5, 10, 3]);
    assert_eq!(
        backend.get_attr(&array, "shape")?,
        AttrValue::IntTuple(vec![5, 10, 3])
    );
    assert_eq!(backend.array_len(&array)?, 5);
    assert_eq!(stored.to_vec::<f32>()?[149], 149.0);

    let bad = NdArray::from_shape_vec(&[3, 10], vec![0f32; 30])?;
    assert!(matches!(backend.append(&array, &bad), Err(ModaqError::Shape(_))));
    let wrong_dtype = NdArray::zeros(DType::Float64, &[10, 3]);
    assert!(matches!(backend.append(&array, &wrong_dtype), Err(ModaqError::Type(_))));
    assert_eq!(backend.array_len(&array)?, 5);
    Ok(())
}

#[test]
fn test_child_names_are_unique() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut backend = H5Backend::new(BackendKind::Tree)?;
    let root = backend.open_file(dir.path().join("unique.dat"), FileMode::Write, "unique")?;

    let first = backend.get_set_group(&root, "Scan000", "first")?;
    let again = backend.get_set_group(&root, "Scan000", "second")?;
    assert_eq!(first, again);
    assert_eq!(backend.get_attr(&again, "TITLE")?, "first");

    let typed = backend.add_group("scan000", GroupType::Scan, &root, "", &Metadata::new())?;
    assert_eq!(typed.name(), "Scan000");
    assert_eq!(backend.children_name(&root)?, vec!["Scan000"]);

    let data = NdArray::linspace(0.0, 1.0, 3);
    backend.create_carray(&first, "Data", &data, "data")?;
    assert!(matches!(
        backend.create_carray(&first, "Data", &data, "data"),
        Err(ModaqError::Node(_))
    ));
    assert!(matches!(
        backend.create_carray(&first, "Other", &data, ""),
        Err(ModaqError::Value(_))
    ));
    assert!(matches!(
        "unknown".parse::<GroupType>(),
        Err(ModaqError::Value(_))
    ));
    Ok(())
}

#[test]
fn test_saved_data_reloads_after_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("detector.h5");
    let dwa = DataWithAxes::new(
        DwaKind::DataRaw,
        "camera",
        vec![NdArray::from_shape_vec(&[2, 2], vec![1u16, 2, 3, 4])?],
    )?
    .with_origin("Camera")
    .with_axes(vec![
        Axis::linear("y", "um", -1.0, 2.0, 2).with_index(0),
        Axis::linear("x", "um", 0.0, 0.5, 2).with_index(1),
    ])?;

    let channel = {
        let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Detector)?;
        saver.init_file(&path, true, &Metadata::new())?;
        let raw = saver.raw_group()?.clone();
        let det = saver.add_det_group(&raw, "camera", "<settings/>", &Metadata::new())?;
        let channels = DataSaver::new(&mut saver).add_data(&det, &dwa, "")?;
        saver.close_file()?;
        channels[0].clone()
    };

    let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Detector)?;
    saver.init_file(&path, false, &Metadata::new())?;
    assert_eq!(channel.path(), "/RawData/Detector000/Data2D/Ch000");
    let loaded = DataSaver::new(&mut saver).load_data(&channel)?;
    assert_eq!(loaded, dwa);
    assert_eq!(loaded.origin(), "Camera");
    Ok(())
}

#[test]
fn test_logger_keeps_arrays_in_lock_step() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Logger)?;
    saver.init_file(&dir.path().join("logger.h5"), true, &Metadata::new())?;
    let mut logger = DataLogger::new(&mut saver, "overnight", "")?;

    let reading = |origin: &str, value: f64| -> anyhow::Result<DataWithAxes> {
        Ok(DataWithAxes::new(DwaKind::DataRaw, "power", vec![NdArray::from_vec(vec![value])])?
            .with_origin(origin))
    };
    let ticks = [
        vec![reading("MeterA", 1.0)?],
        vec![reading("MeterA", 1.1)?, reading("MeterB", 7.0)?],
        vec![reading("MeterB", 7.2)?],
        vec![],
    ];
    for (index, tick) in ticks.into_iter().enumerate() {
        logger.log_tick_at(&mut saver, &DataToExport::new("tick", tick), index as f64)?;
        let expected = index + 1;
        assert_eq!(saver.array_len(logger.time_array())?, expected);
        for key in logger.channel_keys() {
            let array = logger
                .channel_array(key)
                .ok_or_else(|| anyhow::anyhow!("no array for {key}"))?;
            assert_eq!(saver.array_len(array)?, expected, "channel {key}");
        }
    }

    let logs = saver.get_groups(logger.session(), GroupType::Detector)?;
    let names: Vec<&str> = logs.iter().map(|g| g.name()).collect();
    assert_eq!(names, vec!["Detector000", "Detector001"]);
    Ok(())
}
