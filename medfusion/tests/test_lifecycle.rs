use medfusion::prelude::*;
use medfusion::weights::{weight_file_name, WEIGHTS_DIR};
use std::{fs, path::Path};

fn params(seed: u64) -> ModelParams {
    ModelParams::builder()
        .mlp("MLP")
        .labels(&[("death", 2), ("relapse", 2)])
        .mlp_num_inputs(6)
        .seed(seed)
        .build()
}

fn tensors(model: &Model<f32>) -> Vec<(String, Vec<f32>)> {
    let mut tensors = Vec::new();
    model
        .network()
        .iter_tensors("", &mut |k, _, t| tensors.push((k.to_string(), t.as_vec())));
    tensors
}

fn saved(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir.join(WEIGHTS_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_store_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut model: Model<f32> = Model::new(params(0)).unwrap();
    model.train();
    let dev = model.device().clone();
    let x: Tensor<f32> = dev.try_sample([8, 6], rand_distr::StandardNormal).unwrap();
    model.try_forward(ModelInput::tabular(x)).unwrap();

    let expected = tensors(&model);
    model.store_weight(3);
    let path = model.save_weight(dir.path(), false).unwrap();
    assert_eq!(path.file_name().unwrap(), "weight_epoch-003.safetensors");

    model.init_network().unwrap();
    assert_ne!(tensors(&model), expected);
    model.load_weight(&path).unwrap();
    assert_eq!(tensors(&model), expected);
}

#[test]
fn test_save_as_best() {
    let dir = tempfile::tempdir().unwrap();
    let mut model: Model<f32> = Model::new(params(0)).unwrap();

    model.store_weight(5);
    model.save_weight(dir.path(), false).unwrap();
    let best = model.save_weight(dir.path(), true).unwrap();
    assert_eq!(saved(dir.path()), [weight_file_name(5, true)]);
    model.init_network().unwrap();
    model.load_weight(&best).unwrap();

    model.store_weight(6);
    model.save_weight(dir.path(), true).unwrap();
    assert_eq!(
        saved(dir.path()),
        [weight_file_name(5, true), weight_file_name(6, true)]
    );
}

#[test]
fn test_reset_then_load_matches_fresh_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut source: Model<f32> = Model::new(params(1)).unwrap();
    source.store_weight(2);
    let path = source.save_weight(dir.path(), false).unwrap();

    let mut reset: Model<f32> = Model::new(params(2)).unwrap();
    reset.train();
    reset.init_network().unwrap();
    reset.load_weight(&path).unwrap();
    reset.eval();

    let mut fresh: Model<f32> = Model::new(params(3)).unwrap();
    fresh.load_weight(&path).unwrap();
    fresh.eval();

    assert_eq!(tensors(&reset), tensors(&fresh));
    assert_eq!(tensors(&reset), tensors(&source));

    let dev = fresh.device().clone();
    let x: Tensor<f32> = dev.try_sample([4, 6], rand_distr::StandardNormal).unwrap();
    let a = reset.try_forward(ModelInput::tabular(x.clone())).unwrap();
    let b = fresh.try_forward(ModelInput::tabular(x)).unwrap();
    for label in ["death", "relapse"] {
        assert_eq!(
            get_output(&a, label).unwrap().as_vec(),
            get_output(&b, label).unwrap().as_vec()
        );
    }
}

#[test]
fn test_checking_weights_aborts_on_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut model: Model<f32> = Model::new(params(0)).unwrap();
    for epoch in 1..=3 {
        model.store_weight(epoch);
        model.save_weight(dir.path(), false).unwrap();
    }
    let weights = dir.path().join(WEIGHTS_DIR);
    let files = collect_weights(&weights).unwrap();
    assert_eq!(files.len(), 3);
    for path in &files {
        model.init_network().unwrap();
        model.load_weight(path).unwrap();
        model.eval();
    }

    let second = weights.join(weight_file_name(2, false));
    let bytes = fs::read(&second).unwrap();
    fs::write(&second, &bytes[..bytes.len() - 16]).unwrap();

    let mut loaded = 0;
    let result = files.iter().try_for_each(|path| {
        model.init_network()?;
        model.load_weight(path)?;
        model.eval();
        loaded += 1;
        Ok::<_, ModelError>(())
    });
    assert!(result.is_err());
    assert!(loaded < 3);
}

#[test]
fn test_wrong_network_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut model: Model<f32> = Model::new(params(0)).unwrap();
    model.store_weight(1);
    let path = model.save_weight(dir.path(), false).unwrap();

    let other = ModelParams::builder()
        .mlp("MLP")
        .labels(&[("death", 2), ("relapse", 3)])
        .mlp_num_inputs(6)
        .build();
    let mut other: Model<f32> = Model::new(other).unwrap();
    match other.load_weight(&path) {
        Err(ModelError::WeightShape {
            name,
            expected,
            found,
        }) => {
            assert_eq!(name, "fc_multi.fc_relapse.bias");
            assert_eq!(expected, [3]);
            assert_eq!(found, [2]);
        }
        other => panic!("expected a shape error, got {other:?}"),
    }
}

#[test]
fn test_missing_weight_dir() {
    let dir = tempfile::tempdir().unwrap();
    assert!(collect_weights(dir.path().join("absent")).is_err());
    let mut model: Model<f32> = Model::new(params(0)).unwrap();
    assert!(model
        .load_weight(&dir.path().join("weight_epoch-001.safetensors"))
        .is_err());
}
