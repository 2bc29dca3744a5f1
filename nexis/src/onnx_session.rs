use crate::cache_common;
use crate::color_utils::symbols;
use anyhow::{anyhow, bail, Context, Result};
use log::Level;
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider,
        ExecutionProviderDispatch,
    },
    logging::LogLevel,
    session::Session,
};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

/// Devices accepted by `--device`
pub const DEVICE_CHOICES: &[&str] = &["auto", "cpu", "cuda", "coreml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    #[serde(rename = "coreml")]
    CoreMl,
}

impl Device {
    pub fn execution_provider_name(self) -> &'static str {
        match self {
            Device::Cpu => "CPUExecutionProvider",
            Device::Cuda => "CUDAExecutionProvider",
            Device::CoreMl => "CoreMLExecutionProvider",
        }
    }

    fn is_available(self) -> bool {
        let available = match self {
            Device::Cpu => return true,
            Device::Cuda => CUDAExecutionProvider::default().is_available(),
            Device::CoreMl => CoreMLExecutionProvider::default().is_available(),
        };
        matches!(available, Ok(true))
    }

    fn provider(self) -> ExecutionProviderDispatch {
        match self {
            Device::Cpu => CPUExecutionProvider::default().build(),
            Device::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
            Device::CoreMl => CoreMLExecutionProvider::default().build().error_on_failure(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::CoreMl => "coreml",
        })
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            "coreml" => Ok(Device::CoreMl),
            other => Err(anyhow!(
                "Unknown device '{other}'; expected one of {}",
                DEVICE_CHOICES.join(", ")
            )),
        }
    }
}

fn ort_level_from_log(level: Level) -> LogLevel {
    match level {
        // ONNX Runtime's info output reads like our trace
        Level::Trace => LogLevel::Verbose,
        Level::Debug => LogLevel::Warning,
        Level::Info => LogLevel::Error,
        Level::Warn => LogLevel::Error,
        Level::Error => LogLevel::Fatal,
    }
}

fn current_ort_log_level() -> LogLevel {
    [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
    ]
    .into_iter()
    .find(|&lvl| log::log_enabled!(lvl))
    .map(ort_level_from_log)
    .unwrap_or(LogLevel::Fatal)
}

/// Configuration for creating ONNX sessions
pub struct SessionConfig<'a> {
    /// One of [`DEVICE_CHOICES`]
    pub device: &'a str,
}

/// Device selection result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    pub device: Device,
    pub reason: String,
}

/// Resolve `auto` to the best available device; explicit choices pass through
pub fn determine_optimal_device(requested_device: &str) -> Result<DeviceSelection> {
    if requested_device.eq_ignore_ascii_case("auto") {
        for candidate in [Device::Cuda, Device::CoreMl] {
            if candidate.is_available() {
                return Ok(DeviceSelection {
                    device: candidate,
                    reason: format!("Auto-selected {candidate} (available)"),
                });
            }
        }
        return Ok(DeviceSelection {
            device: Device::Cpu,
            reason: "Auto-selected CPU (no accelerator available)".to_string(),
        });
    }

    let device: Device = requested_device.parse()?;
    Ok(DeviceSelection {
        device,
        reason: format!("User explicitly chose {device}"),
    })
}

/// What was loaded and how; reported in logs and the run report
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_path: String,
    pub model_size_bytes: usize,
    pub model_checksum: String,
    pub requested_device: String,
    pub device_selection_reason: String,
    pub execution_provider: String,
    pub fell_back_to_cpu: bool,
    pub load_time_ms: f64,
}

fn build_session(bytes: &[u8], device: Device) -> Result<Session> {
    Session::builder()
        .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
        .with_log_level(current_ort_log_level())
        .map_err(|e| anyhow!("Failed to set log level: {e}"))?
        .with_execution_providers([device.provider()])
        .map_err(|e| anyhow!("Failed to register {}: {e}", device.execution_provider_name()))?
        .commit_from_memory(bytes)
        .map_err(|e| anyhow!("Failed to load model: {e}"))
}

/// Create an ONNX Runtime session for the model at `model_path`.
///
/// An accelerated device that is unavailable, or whose session fails to
/// build, is retried once on the CPU provider.
pub fn create_onnx_session(model_path: &Path, config: &SessionConfig) -> Result<(Session, ModelInfo)> {
    let load_start = Instant::now();

    let bytes = std::fs::read(model_path)
        .with_context(|| format!("Failed to read model {}", model_path.display()))?;
    if bytes.is_empty() {
        bail!("Model file is empty (0 bytes): {}", model_path.display());
    }
    let model_checksum = cache_common::calculate_md5_bytes(&bytes);

    let selection = determine_optimal_device(config.device)?;
    log::debug!("{}{}", symbols::system_setup(), selection.reason);

    let mut fell_back_to_cpu = false;
    let (session, device) = if selection.device == Device::Cpu {
        (build_session(&bytes, Device::Cpu)?, Device::Cpu)
    } else {
        let accelerated = if selection.device.is_available() {
            build_session(&bytes, selection.device)
        } else {
            Err(anyhow!(
                "{} is not available in this build or on this machine",
                selection.device.execution_provider_name()
            ))
        };

        match accelerated {
            Ok(session) => (session, selection.device),
            Err(e) => {
                log::warn!(
                    "{}Could not use {}: {e}. Falling back to CPU",
                    symbols::warning(),
                    selection.device
                );
                fell_back_to_cpu = true;
                let session = build_session(&bytes, Device::Cpu)
                    .context("CPU fallback also failed to load the model")?;
                (session, Device::Cpu)
            }
        }
    };

    let model_info = ModelInfo {
        model_path: model_path.display().to_string(),
        model_size_bytes: bytes.len(),
        model_checksum,
        requested_device: config.device.to_string(),
        device_selection_reason: selection.reason,
        execution_provider: device.execution_provider_name().to_string(),
        fell_back_to_cpu,
        load_time_ms: load_start.elapsed().as_secs_f64() * 1000.0,
    };

    log::info!(
        "{}Model loaded on {} ({}) in {:.0}ms",
        symbols::system_setup(),
        device,
        model_info.execution_provider,
        model_info.load_time_ms
    );

    Ok((session, model_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("coreml".parse::<Device>().unwrap(), Device::CoreMl);
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn test_explicit_device_passes_through() {
        let selection = determine_optimal_device("cpu").unwrap();
        assert_eq!(selection.device, Device::Cpu);
        assert!(selection.reason.contains("explicitly"));

        let selection = determine_optimal_device("cuda").unwrap();
        assert_eq!(selection.device, Device::Cuda);
    }

    #[test]
    fn test_auto_always_resolves() {
        let selection = determine_optimal_device("auto").unwrap();
        assert!(selection.reason.starts_with("Auto-selected"));
    }

    #[test]
    fn test_unknown_device_rejected() {
        assert!(determine_optimal_device("gpu0").is_err());
    }

    #[test]
    fn test_ort_level_mapping() {
        assert!(matches!(ort_level_from_log(Level::Trace), LogLevel::Verbose));
        assert!(matches!(ort_level_from_log(Level::Info), LogLevel::Error));
        assert!(matches!(ort_level_from_log(Level::Error), LogLevel::Fatal));
    }

    #[test]
    fn test_invalid_model_bytes_fail_to_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bogus = temp_dir.path().join("bogus.onnx");
        std::fs::write(&bogus, b"not an onnx graph").unwrap();

        let result = create_onnx_session(&bogus, &SessionConfig { device: "cpu" });
        assert!(result.is_err());
    }

    #[test]
    fn test_device_serializes_lowercase() {
        #[derive(Serialize)]
        struct Wrapper {
            device: Device,
        }
        let text = toml::to_string(&Wrapper {
            device: Device::CoreMl,
        })
        .unwrap();
        assert_eq!(text.trim(), "device = \"coreml\"");
    }
}
