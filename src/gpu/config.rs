//! YAML/JSON authoring for render passes and device configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backend::Backend;
use super::device::{Device, DeviceInfo};
use super::driver::types::Handle;
use super::error::{GPUError, Result};
use super::render_pass::{
    AttachmentDescription, RenderPass, RenderPassInfo, SubpassDependency, SubpassDescription,
};
use super::structs::ClearValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentCfg {
    #[serde(flatten)]
    pub description: AttachmentDescription,
    #[serde(default)]
    pub debug_name: Option<String>,
    #[serde(default)]
    pub clear_value: Option<ClearValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPassCfg {
    pub debug_name: String,
    pub attachments: Vec<AttachmentCfg>,
    pub subpasses: Vec<SubpassDescription>,
    #[serde(default)]
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassCfg {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn descriptions(&self) -> Vec<AttachmentDescription> {
        self.attachments.iter().map(|a| a.description).collect()
    }

    /// Clear values in attachment order, up to the last attachment that
    /// names one. Gaps get the default clear value.
    pub fn clear_values(&self) -> Vec<ClearValue> {
        let len = self
            .attachments
            .iter()
            .rposition(|a| a.clear_value.is_some())
            .map_or(0, |i| i + 1);
        self.attachments[..len]
            .iter()
            .map(|a| a.clear_value.unwrap_or_default())
            .collect()
    }
}

/// Device configuration with durations spelled in plain units. Unset fields
/// keep [`DeviceInfo::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfoCfg {
    pub debug_name: Option<String>,
    pub queue_count: Option<u32>,
    pub poll_interval_min_us: Option<u64>,
    pub poll_interval_max_us: Option<u64>,
    pub semaphore_wait_timeout_ms: Option<u64>,
    pub event_wait_timeout_ms: Option<u64>,
    pub event_error_is_fatal: Option<bool>,
    pub trace_replay: Option<bool>,
}

impl DeviceInfoCfg {
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn into_info(self) -> DeviceInfo {
        let d = DeviceInfo::default();
        DeviceInfo {
            debug_name: self.debug_name.unwrap_or(d.debug_name),
            queue_count: self.queue_count.unwrap_or(d.queue_count),
            poll_interval_min: self
                .poll_interval_min_us
                .map_or(d.poll_interval_min, Duration::from_micros),
            poll_interval_max: self
                .poll_interval_max_us
                .map_or(d.poll_interval_max, Duration::from_micros),
            semaphore_wait_timeout: self
                .semaphore_wait_timeout_ms
                .map_or(d.semaphore_wait_timeout, Duration::from_millis),
            event_wait_timeout: self
                .event_wait_timeout_ms
                .map_or(d.event_wait_timeout, Duration::from_millis),
            event_error_is_fatal: self.event_error_is_fatal.unwrap_or(d.event_error_is_fatal),
            trace_replay: self.trace_replay.unwrap_or(d.trace_replay),
        }
    }
}

impl<B: Backend> Device<B> {
    /// Creates a render pass from YAML, returning it with the clear values
    /// its attachments declare.
    pub fn create_render_pass_from_yaml(
        &self,
        yaml: &str,
    ) -> Result<(Handle<RenderPass>, Vec<ClearValue>)> {
        let cfg = RenderPassCfg::from_yaml(yaml)
            .map_err(|e| GPUError::Validation(format!("render pass yaml: {e}")))?;
        let attachments = cfg.descriptions();
        let pass = self.create_render_pass(&RenderPassInfo {
            debug_name: &cfg.debug_name,
            attachments: &attachments,
            subpasses: &cfg.subpasses,
            dependencies: &cfg.dependencies,
        })?;
        Ok((pass, cfg.clear_values()))
    }

    pub fn create_render_pass_from_yaml_file(
        &self,
        path: &str,
    ) -> Result<(Handle<RenderPass>, Vec<ClearValue>)> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| GPUError::Validation(format!("reading {path}: {e}")))?;
        self.create_render_pass_from_yaml(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_device_cfg_keeps_defaults() {
        let info = DeviceInfoCfg::from_yaml("queue_count: 2\nevent_wait_timeout_ms: 10\n")
            .unwrap()
            .into_info();
        assert_eq!(info.queue_count, 2);
        assert_eq!(info.event_wait_timeout, Duration::from_millis(10));
        assert_eq!(info.poll_interval_min, DeviceInfo::default().poll_interval_min);
        assert!(info.event_error_is_fatal);
    }

    #[test]
    fn json_render_pass_fills_attachment_defaults() {
        let cfg = RenderPassCfg::from_json(
            r#"{
                "debug_name": "json",
                "attachments": [{ "format": "D32Float", "clear_value": { "DepthStencil": { "depth": 1.0, "stencil": 0 } } }],
                "subpasses": [{ "depth_stencil_attachment": 0 }]
            }"#,
        )
        .unwrap();
        let desc = cfg.descriptions();
        assert_eq!(desc[0].load_op, AttachmentDescription::default().load_op);
        assert_eq!(
            cfg.clear_values(),
            vec![ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0
            }]
        );
    }
}
