/// Resource request/limit substitution for storefront manifests
///
/// Manifests are rewritten line by line. Only `cpu:` and `memory:` scalars
/// nested under a `requests:` or `limits:` key are touched, everything else is
/// copied through unchanged so the diff against upstream stays minimal.
use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::quantity::{Cpu, Memory, QuantityError};
use crate::config::{ResourcePatchConfig, ResourceValues};

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<indent>[ ]*)(?P<key>requests|limits):[ ]*(#.*)?$")
            .expect("section regex is valid")
    })
}

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?P<prefix>(?P<indent>[ ]*)(?P<key>cpu|memory):[ ]*)(?P<open>["']?)(?P<value>[0-9][0-9.]*(?:[eE][+-]?[0-9]+)?[A-Za-z]*)(?P<close>["']?)(?P<rest>[ ]*(#.*)?)$"#,
        )
        .expect("value regex is valid")
    })
}

/// Which resource block a value sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Requests,
    Limits,
}

impl Section {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "requests" => Some(Section::Requests),
            "limits" => Some(Section::Limits),
            _ => None,
        }
    }
}

/// Resource kind of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    Memory,
}

/// A single rewritten value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub line: usize,
    pub section: Section,
    pub resource: Resource,
    pub from: String,
    pub to: String,
}

/// Outcome of patching a manifest
#[derive(Debug, Clone)]
pub struct PatchResult {
    pub text: String,
    pub substitutions: Vec<Substitution>,
}

#[derive(Debug, Clone, Default)]
struct FixedValues {
    cpu: Option<String>,
    memory: Option<String>,
}

impl FixedValues {
    fn from_config(values: &ResourceValues) -> Result<Self, QuantityError> {
        if let Some(cpu) = &values.cpu {
            Cpu::parse(cpu)?;
        }
        if let Some(memory) = &values.memory {
            Memory::parse(memory)?;
        }
        Ok(Self {
            cpu: values.cpu.as_ref().map(|v| v.trim().to_string()),
            memory: values.memory.as_ref().map(|v| v.trim().to_string()),
        })
    }

    fn get(&self, resource: Resource) -> Option<&str> {
        match resource {
            Resource::Cpu => self.cpu.as_deref(),
            Resource::Memory => self.memory.as_deref(),
        }
    }
}

/// Validated substitution rules
#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    requests: FixedValues,
    limits: FixedValues,
    scale: Option<f64>,
    min_cpu_millis: u64,
    min_memory_mib: u64,
}

impl ResourcePatch {
    /// Build from configuration, rejecting malformed fixed quantities
    pub fn from_config(config: &ResourcePatchConfig) -> Result<Self> {
        Ok(Self {
            requests: FixedValues::from_config(&config.requests)
                .context("Invalid storefront.resources.requests")?,
            limits: FixedValues::from_config(&config.limits)
                .context("Invalid storefront.resources.limits")?,
            scale: config.scale,
            min_cpu_millis: config.min_cpu_millis,
            min_memory_mib: config.min_memory_mib,
        })
    }

    /// True when no rule would change anything
    pub fn is_noop(&self) -> bool {
        self.scale.is_none()
            && self.requests.cpu.is_none()
            && self.requests.memory.is_none()
            && self.limits.cpu.is_none()
            && self.limits.memory.is_none()
    }

    /// Replacement for `current`, `None` when the value stays as it is
    fn replacement(
        &self,
        section: Section,
        resource: Resource,
        current: &str,
    ) -> Result<Option<String>, QuantityError> {
        let fixed = match section {
            Section::Requests => &self.requests,
            Section::Limits => &self.limits,
        };

        let new_value = match (fixed.get(resource), self.scale) {
            (Some(value), _) => value.to_string(),
            (None, Some(factor)) => match resource {
                Resource::Cpu => Cpu::parse(current)?
                    .scale(factor, self.min_cpu_millis)
                    .to_string(),
                Resource::Memory => Memory::parse(current)?
                    .scale(factor, self.min_memory_mib)
                    .to_string(),
            },
            (None, None) => return Ok(None),
        };

        Ok((new_value != current).then_some(new_value))
    }

    /// Rewrite resource values in manifest text
    pub fn apply(&self, text: &str) -> Result<PatchResult> {
        let mut output = String::with_capacity(text.len());
        let mut substitutions = Vec::new();
        // Active block and the indentation of its key
        let mut current: Option<(Section, usize)> = None;

        for (index, raw_line) in text.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let (line, ending) = split_line_ending(raw_line);

            if line.trim() == "---" {
                current = None;
                output.push_str(raw_line);
                continue;
            }

            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                output.push_str(raw_line);
                continue;
            }

            let indent = line.len() - trimmed.len();
            if let Some((_, section_indent)) = current {
                if indent <= section_indent {
                    current = None;
                }
            }

            if let Some(caps) = section_re().captures(line) {
                current = Section::from_key(&caps["key"]).map(|s| (s, caps["indent"].len()));
                output.push_str(raw_line);
                continue;
            }

            let Some((section, _)) = current else {
                output.push_str(raw_line);
                continue;
            };

            let Some(caps) = value_re().captures(line) else {
                output.push_str(raw_line);
                continue;
            };

            if caps["open"] != caps["close"] {
                output.push_str(raw_line);
                continue;
            }

            let resource = match &caps["key"] {
                "cpu" => Resource::Cpu,
                _ => Resource::Memory,
            };
            let value = &caps["value"];

            let replacement = self
                .replacement(section, resource, value)
                .with_context(|| format!("line {}: cannot rewrite `{}`", line_no, line.trim()))?;

            match replacement {
                Some(new_value) => {
                    debug!(
                        "line {}: {:?} {:?} {} -> {}",
                        line_no, section, resource, value, new_value
                    );
                    output.push_str(&caps["prefix"]);
                    output.push_str(&caps["open"]);
                    output.push_str(&new_value);
                    output.push_str(&caps["close"]);
                    output.push_str(&caps["rest"]);
                    output.push_str(ending);
                    substitutions.push(Substitution {
                        line: line_no,
                        section,
                        resource,
                        from: value.to_string(),
                        to: new_value,
                    });
                }
                None => output.push_str(raw_line),
            }
        }

        Ok(PatchResult {
            text: output,
            substitutions,
        })
    }

    /// Patch `source` into `destination`, leaving the source untouched
    pub async fn apply_to_file(&self, source: &Path, destination: &Path) -> Result<PatchResult> {
        let text = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read manifest {}", source.display()))?;

        let result = self
            .apply(&text)
            .with_context(|| format!("Failed to patch {}", source.display()))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create output directory")?;
        }
        tokio::fs::write(destination, &result.text)
            .await
            .with_context(|| format!("Failed to write {}", destination.display()))?;

        info!(
            "Patched {} resource values into {}",
            result.substitutions.len(),
            destination.display()
        );

        Ok(result)
    }
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: frontend
spec:
  template:
    spec:
      containers:
        - name: server
          image: frontend:v0.10.0
          resources:
            requests:
              cpu: 100m
              memory: 64Mi
            limits:
              cpu: 200m
              memory: \"128Mi\"
          env:
            - name: cpu
              value: \"1\"
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: tuning
data:
  requests: configured
  cpu: 300m
";

    fn fixed_requests() -> ResourcePatchConfig {
        ResourcePatchConfig {
            requests: ResourceValues {
                cpu: Some("50m".to_string()),
                memory: Some("32Mi".to_string()),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_request_overrides() {
        let patch = ResourcePatch::from_config(&fixed_requests()).unwrap();
        let result = patch.apply(MANIFEST).unwrap();

        assert_eq!(result.substitutions.len(), 2);
        assert!(result.text.contains("              cpu: 50m\n              memory: 32Mi\n"));
        assert!(result.text.contains("              cpu: 200m\n              memory: \"128Mi\"\n"));
        // Values outside resource blocks are untouched
        assert!(result.text.contains("  cpu: 300m\n"));
        assert!(result.text.contains("value: \"1\""));
    }

    #[test]
    fn test_fixed_overrides_are_idempotent() {
        let patch = ResourcePatch::from_config(&fixed_requests()).unwrap();
        let first = patch.apply(MANIFEST).unwrap();
        let second = patch.apply(&first.text).unwrap();

        assert!(second.substitutions.is_empty());
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn test_scale_keeps_quotes_and_units() {
        let config = ResourcePatchConfig {
            scale: Some(0.5),
            min_cpu_millis: 10,
            min_memory_mib: 16,
            ..Default::default()
        };
        let result = ResourcePatch::from_config(&config)
            .unwrap()
            .apply(MANIFEST)
            .unwrap();

        assert_eq!(result.substitutions.len(), 4);
        assert!(result.text.contains("cpu: 50m\n              memory: 32Mi\n"));
        assert!(result.text.contains("cpu: 100m\n              memory: \"64Mi\"\n"));

        let limits_cpu = &result.substitutions[2];
        assert_eq!(limits_cpu.section, Section::Limits);
        assert_eq!(limits_cpu.resource, Resource::Cpu);
        assert_eq!(limits_cpu.line, 16);
        assert_eq!((limits_cpu.from.as_str(), limits_cpu.to.as_str()), ("200m", "100m"));
    }

    #[test]
    fn test_fixed_value_wins_over_scale() {
        let config = ResourcePatchConfig {
            limits: ResourceValues {
                cpu: Some("1".to_string()),
                memory: None,
            },
            scale: Some(2.0),
            ..Default::default()
        };
        let result = ResourcePatch::from_config(&config)
            .unwrap()
            .apply(MANIFEST)
            .unwrap();

        assert!(result.text.contains("cpu: 200m\n              memory: 128Mi\n"));
        assert!(result.text.contains("cpu: 1\n              memory: \"256Mi\"\n"));
    }

    #[test]
    fn test_noop_patch_returns_identical_text() {
        let patch = ResourcePatch::from_config(&ResourcePatchConfig::default()).unwrap();
        assert!(patch.is_noop());

        let result = patch.apply(MANIFEST).unwrap();
        assert_eq!(result.text, MANIFEST);
        assert!(result.substitutions.is_empty());
    }

    #[test]
    fn test_crlf_and_comments_preserved() {
        let text = "resources:\r\n  requests:  # tuned\r\n    cpu: 100m # per pod\r\n";
        let result = ResourcePatch::from_config(&fixed_requests())
            .unwrap()
            .apply(text)
            .unwrap();

        assert_eq!(
            result.text,
            "resources:\r\n  requests:  # tuned\r\n    cpu: 50m # per pod\r\n"
        );
    }

    #[test]
    fn test_invalid_fixed_value_rejected() {
        let config = ResourcePatchConfig {
            requests: ResourceValues {
                cpu: Some("lots".to_string()),
                memory: None,
            },
            ..Default::default()
        };
        assert!(ResourcePatch::from_config(&config).is_err());
    }

    #[test]
    fn test_unparseable_value_under_scale_reports_line() {
        let text = "requests:\n  memory: 64Zi\n";
        let config = ResourcePatchConfig {
            scale: Some(0.5),
            ..Default::default()
        };
        let err = ResourcePatch::from_config(&config)
            .unwrap()
            .apply(text)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_scale_understands_exponents_and_large_units() {
        let text = "limits:\n  memory: 1e9\n  cpu: 5e-1\nrequests:\n  memory: 1Pi\n";
        let config = ResourcePatchConfig {
            scale: Some(0.5),
            ..Default::default()
        };
        let result = ResourcePatch::from_config(&config)
            .unwrap()
            .apply(text)
            .unwrap();

        assert_eq!(
            result.text,
            "limits:\n  memory: 477Mi\n  cpu: 250m\nrequests:\n  memory: 512Ti\n"
        );
    }

    #[tokio::test]
    async fn test_apply_to_file_leaves_source_alone() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("kubernetes-manifests.yaml");
        let destination = dir.path().join("out").join("patched.yaml");
        tokio::fs::write(&source, MANIFEST).await.unwrap();

        let result = ResourcePatch::from_config(&fixed_requests())
            .unwrap()
            .apply_to_file(&source, &destination)
            .await
            .unwrap();

        assert_eq!(result.substitutions.len(), 2);
        assert_eq!(tokio::fs::read_to_string(&source).await.unwrap(), MANIFEST);
        assert_eq!(
            tokio::fs::read_to_string(&destination).await.unwrap(),
            result.text
        );
    }
}
