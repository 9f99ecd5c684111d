use std::{env, fs, path::PathBuf};

use mixture_core::{
    generate_random_mixture, load_mixture, save_mixture, F32x3, F64x3, MixtureError, RandomMixtureSettings,
    RECORD_VERSION,
};

fn temp_file_path(tag: &str) -> PathBuf {
    let mut path = env::temp_dir();
    path.push(format!("mixture_core_{tag}_{}.json", std::process::id()));
    path
}

fn settings() -> RandomMixtureSettings {
    RandomMixtureSettings {
        n_batch: 2,
        n_layers: 3,
        n_components: 4,
        seed: Some(0xFACE),
        ..Default::default()
    }
}

#[test]
fn mixtures_round_trip_through_json_files() {
    let (mixture, _) = generate_random_mixture::<F64x3>(&settings()).expect("generate");
    let path = temp_file_path("round_trip");
    save_mixture(&mixture, &path).expect("failed to save mixture");
    let loaded = load_mixture::<F64x3>(&path).expect("failed to load mixture");
    fs::remove_file(&path).ok();

    assert_eq!(loaded.shape(), (2, 3, 4));
    for (lhs, rhs) in mixture.gaussians().iter().zip(loaded.gaussians()) {
        assert!((lhs.weight - rhs.weight).abs() <= 1e-12);
        assert!((lhs.position - rhs.position).abs().max_element() <= 1e-12);
        assert!(lhs.covariance.abs_diff_eq(rhs.covariance, 1e-12));
    }
}

#[test]
fn double_precision_files_load_at_single_precision() {
    let (mixture, _) = generate_random_mixture::<F64x3>(&settings()).expect("generate");
    let path = temp_file_path("narrowing");
    save_mixture(&mixture, &path).expect("failed to save mixture");
    let loaded = load_mixture::<F32x3>(&path).expect("failed to load mixture");
    fs::remove_file(&path).ok();

    for (wide, narrow) in mixture.gaussians().iter().zip(loaded.gaussians()) {
        assert!((wide.weight - narrow.weight as f64).abs() <= 1e-6);
        assert!((wide.position - narrow.position.as_dvec3()).abs().max_element() <= 1e-5);
    }
}

#[test]
fn stale_versions_surface_as_typed_errors() {
    let (mixture, _) = generate_random_mixture::<F64x3>(&settings()).expect("generate");
    let mut record = mixture.to_record();
    record.version = RECORD_VERSION - 1;
    let path = temp_file_path("stale");
    fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
    let err = load_mixture::<F64x3>(&path).unwrap_err();
    fs::remove_file(&path).ok();

    assert_eq!(
        err.downcast_ref::<MixtureError>(),
        Some(&MixtureError::UnsupportedVersion {
            found: RECORD_VERSION - 1,
            expected: RECORD_VERSION
        })
    );
}

#[test]
fn missing_files_report_the_path() {
    let path = temp_file_path("missing");
    let err = load_mixture::<F64x3>(&path).unwrap_err();
    assert!(format!("{err:#}").contains("mixture_core_missing"));
}
