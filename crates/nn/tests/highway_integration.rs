//! Integration tests for the highway block
//!
//! Covers batch/incremental equivalence, buffer isolation between
//! sequences, the gating formulas, dropout and a training step.

use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{ops, Optimizer, VarBuilder, VarMap, SGD};

use deepvoice_config::HighwayConfig;
use deepvoice_nn::{load_parameters, save_parameters, HighwayConv1d, Layer, NnError};

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    let a: Vec<f32> = a.flatten_all()?.to_vec1()?;
    let b: Vec<f32> = b.flatten_all()?.to_vec1()?;
    assert_eq!(a.len(), b.len());
    Ok(a.iter().zip(&b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max))
}

/// Feed `x: (B, C, T)` one step at a time, returning `(B, C, T)`
fn run_incremental(block: &mut HighwayConv1d, x: &Tensor) -> Result<Tensor> {
    let frames = x.transpose(1, 2)?.contiguous()?;
    let mut steps = Vec::new();
    for t in 0..frames.dim(1)? {
        steps.push(block.incremental_forward(&frames.narrow(1, t, 1)?)?);
    }
    Ok(Tensor::cat(&steps, 1)?.transpose(1, 2)?)
}

fn highway_block(
    config: &HighwayConfig,
    channels: usize,
    device: &Device,
) -> Result<HighwayConv1d> {
    let vb = VarBuilder::from_varmap(&VarMap::new(), DType::F32, device);
    Ok(HighwayConv1d::new(channels, channels, config, vb)?)
}

fn causal_block(channels: usize, kernel_size: usize, dilation: usize, glu: bool) -> Result<HighwayConv1d> {
    let config = HighwayConfig::default()
        .with_kernel_size(kernel_size)
        .with_dilation(dilation)
        .causal(true)
        .glu(glu);
    let mut highway = highway_block(&config, channels, &Device::Cpu)?;
    highway.eval();
    Ok(highway)
}

#[test]
fn test_incremental_matches_batch() -> Result<()> {
    let device = Device::Cpu;
    for glu in [false, true] {
        for dilation in [1, 2] {
            let mut block = causal_block(4, 3, dilation, glu)?;
            let x = Tensor::randn(0f32, 1.0, (2, 4, 9), &device)?;

            let batch = block.forward(&x)?;
            let incremental = run_incremental(&mut block, &x)?;
            let diff = max_abs_diff(&batch, &incremental)?;
            assert!(diff < 1e-4, "glu={} dilation={} diff={}", glu, dilation, diff);
        }
    }
    Ok(())
}

#[test]
fn test_clear_buffer_isolates_sequences() -> Result<()> {
    let device = Device::Cpu;
    let mut block = causal_block(3, 4, 1, true)?;
    let first = Tensor::randn(0f32, 1.0, (1, 3, 6), &device)?;
    let second = Tensor::randn(0f32, 1.0, (1, 3, 5), &device)?;

    run_incremental(&mut block, &first)?;
    block.clear_buffer();
    let decoded = run_incremental(&mut block, &second)?;

    let expected = block.forward(&second)?;
    assert!(max_abs_diff(&decoded, &expected)? < 1e-4);
    Ok(())
}

#[test]
fn test_stale_buffer_leaks_without_clear() -> Result<()> {
    let device = Device::Cpu;
    let mut block = causal_block(3, 3, 1, false)?;
    let first = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?.affine(1.0, 5.0)?;
    let second = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;

    run_incremental(&mut block, &first)?;
    let decoded = run_incremental(&mut block, &second)?;

    // the first output step still sees the previous sequence
    let expected = block.forward(&second)?;
    assert!(max_abs_diff(&decoded.narrow(2, 0, 1)?, &expected.narrow(2, 0, 1)?)? > 1e-6);
    Ok(())
}

#[test]
fn test_incremental_consumes_last_frame_only() -> Result<()> {
    let device = Device::Cpu;
    let mut growing = causal_block(3, 3, 2, false)?;
    let mut framed = growing.clone();
    let frames = Tensor::randn(0f32, 1.0, (2, 6, 3), &device)?;

    for t in 0..6 {
        let from_prefix = growing.incremental_forward(&frames.narrow(1, 0, t + 1)?)?;
        let from_frame = framed.incremental_forward(&frames.narrow(1, t, 1)?)?;
        assert_eq!(from_prefix.dims(), &[2, 1, 3]);
        assert!(max_abs_diff(&from_prefix, &from_frame)? < 1e-6);
    }
    Ok(())
}

#[test]
fn test_causal_output_length() -> Result<()> {
    let device = Device::Cpu;
    for kernel_size in [1, 2, 3, 5] {
        for dilation in [1, 3] {
            let block = causal_block(2, kernel_size, dilation, false)?;
            let x = Tensor::randn(0f32, 1.0, (3, 2, 11), &device)?;
            assert_eq!(block.forward(&x)?.dims(), &[3, 2, 11]);
        }
    }
    Ok(())
}

#[test]
fn test_causal_output_ignores_future() -> Result<()> {
    let device = Device::Cpu;
    let block = causal_block(2, 3, 2, true)?;
    let x = Tensor::randn(0f32, 1.0, (1, 2, 8), &device)?;
    let perturbed = Tensor::cat(&[x.narrow(2, 0, 5)?, x.narrow(2, 5, 3)?.affine(3.0, 1.0)?], 2)?;

    let a = block.forward(&x)?.narrow(2, 0, 5)?;
    let b = block.forward(&perturbed)?.narrow(2, 0, 5)?;
    assert!(max_abs_diff(&a, &b)? < 1e-6);
    Ok(())
}

#[test]
fn test_highway_gating_formula() -> Result<()> {
    let device = Device::Cpu;
    let config = HighwayConfig::default().with_kernel_size(3);
    let mut block = highway_block(&config, 4, &device)?;
    block.eval();

    let x = Tensor::randn(0f32, 1.0, (2, 4, 7), &device)?;
    let h = block.conv().forward(&x)?;
    let a = h.narrow(1, 0, 4)?;
    let gate = ops::sigmoid(&h.narrow(1, 4, 4)?)?;
    let carry = gate.affine(-1.0, 1.0)?;
    let expected = ((&gate * &a)? + (&carry * &x)?)?;

    let out = block.forward(&x)?;
    assert_eq!(out.dims(), &[2, 4, 7]);
    assert!(max_abs_diff(&out, &expected)? < 1e-5);
    Ok(())
}

#[test]
fn test_glu_gating_formula() -> Result<()> {
    let device = Device::Cpu;
    let config = HighwayConfig::default().with_kernel_size(3).glu(true);
    let mut block = highway_block(&config, 4, &device)?;
    block.eval();

    let x = Tensor::randn(0f32, 1.0, (1, 4, 6), &device)?;
    let h = block.conv().forward(&x)?;
    let gated = (h.narrow(1, 0, 4)? * ops::sigmoid(&h.narrow(1, 4, 4)?)?)?;
    let expected = (gated + &x)?.affine(0.5f64.sqrt(), 0.0)?;

    assert!(max_abs_diff(&block.forward(&x)?, &expected)? < 1e-5);
    Ok(())
}

#[test]
fn test_incremental_rejected_in_training() -> Result<()> {
    let device = Device::Cpu;
    let config = HighwayConfig::default().with_kernel_size(3).causal(true);
    let mut block = highway_block(&config, 2, &device)?;
    let frame = Tensor::zeros((1, 1, 2), DType::F32, &device)?;

    assert!(matches!(
        block.incremental_forward(&frame),
        Err(NnError::IncrementalInTraining { .. })
    ));
    Ok(())
}

#[test]
fn test_dropout_only_in_training() -> Result<()> {
    let device = Device::Cpu;
    let config = HighwayConfig::default().with_kernel_size(3).with_dropout(0.5);
    let mut block = highway_block(&config, 4, &device)?;
    let x = Tensor::randn(0f32, 1.0, (2, 4, 16), &device)?;

    let first = block.forward(&x)?;
    let second = block.forward(&x)?;
    assert!(max_abs_diff(&first, &second)? > 1e-4);

    block.eval();
    let evaluated = block.forward(&x)?;
    assert_eq!(max_abs_diff(&evaluated, &block.forward(&x)?)?, 0.0);

    // eval output is the gating formula on the undropped input
    let h = block.conv().forward(&x)?;
    let gate = ops::sigmoid(&h.narrow(1, 4, 4)?)?;
    let carry = gate.affine(-1.0, 1.0)?;
    let expected = ((&gate * &h.narrow(1, 0, 4)?)? + (&carry * &x)?)?;
    assert!(max_abs_diff(&evaluated, &expected)? < 1e-5);
    Ok(())
}

#[test]
fn test_sgd_step_updates_parameters() -> Result<()> {
    let device = Device::Cpu;
    let config = HighwayConfig::default().with_kernel_size(3).glu(true);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let block = HighwayConv1d::new(3, 3, &config, vb)?;
    let weight_v = block.conv().weight().weight_v().clone();
    let before: Vec<f32> = weight_v.flatten_all()?.to_vec1()?;

    let mut sgd = SGD::new(varmap.all_vars(), 0.1)?;
    let x = Tensor::randn(0f32, 1.0, (2, 3, 5), &device)?;
    let loss = block.forward(&x)?.sqr()?.mean_all()?;
    sgd.backward_step(&loss)?;

    let after: Vec<f32> = weight_v.flatten_all()?.to_vec1()?;
    assert!(before.iter().zip(&after).any(|(b, a)| (b - a).abs() > 0.0));
    Ok(())
}

#[test]
fn test_checkpoint_roundtrip() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("highway.safetensors");
    let config = HighwayConfig::default().with_kernel_size(3).causal(true);

    let source_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&source_map, DType::F32, &device);
    let mut source = HighwayConv1d::new(4, 4, &config, vb.pp("highway"))?;
    source.eval();
    save_parameters(&source_map, &path)?;

    let mut restored_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&restored_map, DType::F32, &device);
    let mut restored = HighwayConv1d::new(4, 4, &config, vb.pp("highway"))?;
    restored.eval();
    assert_eq!(load_parameters(&mut restored_map, &path)?, 3);

    let x = Tensor::randn(0f32, 1.0, (1, 4, 6), &device)?;
    assert!(max_abs_diff(&source.forward(&x)?, &restored.forward(&x)?)? < 1e-6);
    Ok(())
}
