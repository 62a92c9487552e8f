//! # Audio Capture Module
//!
//! Real-time capture from the default input device using CPAL. Incoming
//! samples are accumulated and cut into fixed-size frames that are handed to
//! the tuning session over a channel.
//!
//! ## Features
//! - Default input device selection
//! - Mono f32 stream at the supported rate closest to the configured one
//! - Bounded frame channel: frames are dropped, never queued without limit,
//!   when the consumer falls behind

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::Sender;
use log::{error, info};

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `sender` - Channel for complete frames
/// * `target_rate` - Preferred sample rate in Hz
/// * `frame_size` - Samples per frame
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Stream handle (capture stops when dropped)
///   and the rate actually in use
/// * `Err(e)` - No device or no usable f32 configuration
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    target_rate: u32,
    frame_size: usize,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let config: cpal::StreamConfig = config.into();

    info!("Selected sample rate: {} Hz, {} channel(s)", sample_rate, channels);

    let err_fn = |err| error!("An error occurred on the audio stream: {}", err);

    let mut audio_buffer: Vec<f32> = Vec::with_capacity(frame_size * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // first channel only
            audio_buffer.extend(data.iter().step_by(channels.max(1)));

            while audio_buffer.len() >= frame_size {
                let frame: Vec<f32> = audio_buffer.drain(..frame_size).collect();
                let _ = sender.try_send(frame);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Picks an f32 configuration, preferring mono and then the range closest to
/// `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let covers = min <= target_rate && target_rate <= max;
            let distance = if covers {
                0
            } else {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            };
            (c.channels() != 1, distance)
        })
}
