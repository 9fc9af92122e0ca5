use std::{env, process};

use anyhow::{Context, bail};
use log::{info, warn};

use training_session::{StateDict, config::TrainSpec};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let Some(path) = env::args().nth(1) else {
        bail!("usage: trainer <spec.json>");
    };

    let spec = TrainSpec::from_file(&path).with_context(|| format!("reading {path}"))?;
    let samples = spec.tensors()?;
    if samples.is_empty() {
        warn!("the spec has no samples, nothing to train on");
    }

    let session = spec.session.build()?;

    if let Some(resume) = &spec.resume {
        let snapshot = StateDict::load(resume)
            .with_context(|| format!("reading checkpoint {}", resume.display()))?;
        session.load_state_dict(&snapshot, false)?;
        info!("resumed from {}", resume.display());
    }

    let loss_idx = session
        .model_desc()
        .outputs
        .iter()
        .position(|o| o.is_loss)
        .unwrap_or(0);

    for epoch in 0..spec.epochs.get() {
        let mut total = 0.;
        for sample in &samples {
            let result = session.train_step(sample.clone())?;
            total += result.outputs[loss_idx].sum();
        }

        let mean = total / samples.len().max(1) as f32;
        info!(epoch = epoch, loss = mean; "epoch finished");
    }

    session.eval()?;
    for (i, sample) in samples.iter().enumerate() {
        let outputs = session.step(sample.clone())?;
        let names = session.model_desc().output_names();
        for (name, output) in names.zip(&outputs) {
            println!("sample {i} {name}: {output}");
        }
    }

    if let Some(checkpoint) = &spec.checkpoint {
        session.state_dict()?.save(checkpoint)?;
        info!("checkpoint written to {}", checkpoint.display());
    }

    if let Some(onnx) = &spec.onnx {
        session.save_as_onnx(onnx)?;
    }

    session.close()?;
    Ok(())
}
