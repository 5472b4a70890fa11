use std::path::Path;

use azpolicy_domain::{Expectation, ExpectationMatrix, NetworkCase, RegionCase};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawMatrix, RawNetworkCase, RawRegionCase};

pub const DEFAULT_NETWORK_REGION: &str = "Switzerland West";

const DEFAULT_MATRIX_YAML: &str = include_str!("../default-matrix.yml");
const DEFAULT_MATRIX_SOURCE: &str = "<built-in default-matrix.yml>";

/// Load an expectation matrix from a YAML file.
///
/// ```text
/// network_region: Switzerland West
/// regions:
///   - { region: Brazil Southeast, expect: deny, policy: denied regions }
///   - { region: East US, expect: allow }
/// security_groups:
///   - { source_prefix: "*", port: 22, expect: deny, policy: nsg deny any ssh rule }
/// security_rules:
///   - { source_prefix: 192.168.0.0/24, port: 22, expect: allow }
/// ```
pub fn load_matrix(path: &Path) -> Result<ExpectationMatrix, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("Loading expectation matrix from {}", path.display());
    parse_matrix(&content, &path.display().to_string())
}

/// The matrix the organization's baseline policies are expected to satisfy.
pub fn default_matrix() -> Result<ExpectationMatrix, ConfigError> {
    parse_matrix(DEFAULT_MATRIX_YAML, DEFAULT_MATRIX_SOURCE)
}

/// Parse matrix YAML. `source` only labels errors.
pub fn parse_matrix(content: &str, source: &str) -> Result<ExpectationMatrix, ConfigError> {
    let raw: RawMatrix = serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse {
        path: source.to_string(),
        source: e,
    })?;
    convert_matrix(raw, source)
}

fn convert_matrix(raw: RawMatrix, source: &str) -> Result<ExpectationMatrix, ConfigError> {
    let regions = raw
        .regions
        .into_iter()
        .map(|r| convert_region(r, source))
        .collect::<Result<Vec<_>, _>>()?;
    let security_groups = raw
        .security_groups
        .into_iter()
        .map(|c| convert_network(c, source))
        .collect::<Result<Vec<_>, _>>()?;
    let security_rules = raw
        .security_rules
        .into_iter()
        .map(|c| convert_network(c, source))
        .collect::<Result<Vec<_>, _>>()?;

    let network_region = match raw.network_region {
        Some(r) if r.trim().is_empty() => {
            return Err(ConfigError::Conversion {
                path: source.to_string(),
                message: "network_region is empty".into(),
            })
        }
        Some(r) => r,
        None    => DEFAULT_NETWORK_REGION.to_string(),
    };

    Ok(ExpectationMatrix {
        regions,
        network_region,
        security_groups,
        security_rules,
    })
}

fn convert_region(raw: RawRegionCase, source: &str) -> Result<RegionCase, ConfigError> {
    if raw.region.trim().is_empty() {
        return Err(ConfigError::Conversion {
            path: source.to_string(),
            message: "region case with empty region".into(),
        });
    }
    let expect = parse_expectation(&raw.expect, raw.policy, source)?;
    Ok(RegionCase { region: raw.region, expect })
}

fn convert_network(raw: RawNetworkCase, source: &str) -> Result<NetworkCase, ConfigError> {
    if raw.source_prefix.trim().is_empty() {
        return Err(ConfigError::Conversion {
            path: source.to_string(),
            message: "network case with empty source_prefix".into(),
        });
    }
    let port = raw.port.into_string();
    if port.trim().is_empty() {
        return Err(ConfigError::Conversion {
            path: source.to_string(),
            message: format!("network case for '{}' has an empty port", raw.source_prefix),
        });
    }
    let expect = parse_expectation(&raw.expect, raw.policy, source)?;
    Ok(NetworkCase {
        source_prefix: raw.source_prefix,
        port,
        expect,
    })
}

fn parse_expectation(
    expect: &str,
    policy: Option<String>,
    source: &str,
) -> Result<Expectation, ConfigError> {
    match (expect, policy) {
        ("allow", None) => Ok(Expectation::Allow),
        ("allow", Some(p)) => Err(ConfigError::Conversion {
            path: source.to_string(),
            message: format!("case expects allow but names policy '{}'", p),
        }),
        ("deny", Some(p)) if !p.trim().is_empty() => Ok(Expectation::Deny { policy: p }),
        ("deny", _) => Err(ConfigError::Conversion {
            path: source.to_string(),
            message: "case expects deny but names no policy".into(),
        }),
        (other, _) => Err(ConfigError::Conversion {
            path: source.to_string(),
            message: format!("unknown expectation '{}' (want allow or deny)", other),
        }),
    }
}
