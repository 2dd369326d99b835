use std::fs;

use bsfit_core::BsfitError;
use bsfit_io::{load_samples, save_samples, DelimitedOptions};
use bsfit_model::{BSpline, BSplineBuilder, SampleStore};

#[test]
fn test_file_to_model_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let samples_path = dir.path().join("samples.csv");

    let mut text = String::from("x0,x1,y\n");
    for i in 0..6 {
        for j in 0..6 {
            let (a, b) = (i as f64, j as f64);
            text.push_str(&format!("{a},{b},{}\n", a + 0.5 * b));
        }
    }
    fs::write(&samples_path, text).unwrap();

    let store = load_samples(&samples_path, &DelimitedOptions::default().with_header(true)).unwrap();
    assert_eq!(store.len(), 36);

    let spline = BSplineBuilder::new(&store).build().unwrap();
    let model_path = dir.path().join("model.json");
    spline.save(&model_path).unwrap();
    let loaded = BSpline::load(&model_path).unwrap();
    assert!((loaded.eval(&[2.5, 3.5]).unwrap() - 4.25).abs() < 1e-9);
}

#[test]
fn test_save_and_reload_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.tsv");
    let store =
        SampleStore::from_samples(vec![([0.25], 1.0 / 3.0), ([0.75], 2.0f64.sqrt())]).unwrap();

    save_samples(&path, &store, '\t').unwrap();
    let back = load_samples(&path, &DelimitedOptions::default().with_delimiter('\t')).unwrap();
    assert_eq!(back, store);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_samples(dir.path().join("none.csv"), &DelimitedOptions::default()).unwrap_err();
    assert!(matches!(err, BsfitError::Io(_)));
}
