// Audio capture collaborator.
//
// The engine itself only consumes sample blocks; this module owns the cpal
// plumbing that produces them. It enumerates input devices and runs a capture
// stream that delivers mono f32 blocks to a callback, refusing any sample
// rate other than the engine's 96 kHz.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::fft::SAMPLE_RATE_HZ;
use crate::error::CaptureError;

/// Names of the available capture devices on the default host.
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
    }
    names
}

/// A running capture stream feeding mono f32 blocks to a callback.
pub struct MicrophoneCapture {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl MicrophoneCapture {
    /// Open `device_name` (or the default input device) at `sample_rate` and
    /// start delivering mono blocks to `on_samples` from the audio thread.
    ///
    /// The engine analyzes 96 kHz only; any other rate is rejected before a
    /// device is touched.
    pub fn start<F>(
        device_name: Option<&str>,
        sample_rate: u32,
        mut on_samples: F,
    ) -> Result<Self, CaptureError>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        if sample_rate != SAMPLE_RATE_HZ {
            return Err(CaptureError::UnsupportedSampleRate(sample_rate));
        }

        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::Stream(e.to_string()))?
                .find(|d| d.name().ok().is_some_and(|n| n == name))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };
        log::info!("capture device: {}", device.name().unwrap_or_default());

        let supported = device
            .supported_input_configs()
            .map_err(|e| CaptureError::Stream(e.to_string()))?
            .collect::<Vec<_>>();

        // Prefer mono f32 at the requested rate, then any channel count
        let rate = cpal::SampleRate(sample_rate);
        let in_rate =
            |c: &cpal::SupportedStreamConfigRange| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate;
        let config_range = supported
            .iter()
            .find(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32 && in_rate(c))
            .or_else(|| {
                supported
                    .iter()
                    .find(|c| c.sample_format() == cpal::SampleFormat::F32 && in_rate(c))
            })
            .or_else(|| {
                supported
                    .iter()
                    .find(|c| c.sample_format() == cpal::SampleFormat::I16 && in_rate(c))
            })
            .ok_or(CaptureError::NoUsableConfig)?;

        let channels = usize::from(config_range.channels());
        let config = cpal::StreamConfig {
            channels: config_range.channels(),
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let err_fn = |err| log::error!("capture stream error: {}", err);

        let stream = match config_range.sample_format() {
            cpal::SampleFormat::F32 => {
                let mut mono = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        mix_to_mono(data, channels, &mut mono);
                        on_samples(&mono);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let mut mono = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        mono.clear();
                        mono.extend(
                            data.chunks(channels.max(1)).map(|frame| {
                                let sum: f32 =
                                    frame.iter().map(|&s| f32::from(s) / 32768.0).sum();
                                sum / frame.len() as f32
                            }),
                        );
                        on_samples(&mono);
                    },
                    err_fn,
                    None,
                )
            }
            _ => return Err(CaptureError::NoUsableConfig),
        }
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

        stream.play().map_err(|e| CaptureError::Stream(e.to_string()))?;
        log::info!("capture started at {} Hz", sample_rate);

        Ok(Self { stream, sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stop capturing and release the device.
    pub fn stop(self) {
        drop(self.stream);
        log::info!("capture stopped");
    }
}

/// Average interleaved frames down to mono in place.
fn mix_to_mono(data: &[f32], channels: usize, mono: &mut Vec<f32>) {
    mono.clear();
    if channels <= 1 {
        mono.extend_from_slice(data);
        return;
    }
    mono.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_96k_rate_rejected_before_device_access() {
        let result = MicrophoneCapture::start(None, 48_000, |_| {});
        assert!(matches!(result, Err(CaptureError::UnsupportedSampleRate(48_000))));
    }

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let mut mono = Vec::new();
        mix_to_mono(&[0.2, 0.4, -0.2, 0.6], 2, &mut mono);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_mix_to_mono_passthrough() {
        let mut mono = Vec::new();
        mix_to_mono(&[0.1, -0.1], 1, &mut mono);
        assert_eq!(mono, vec![0.1, -0.1]);
    }
}
