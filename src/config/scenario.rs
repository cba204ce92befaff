use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters used to procedurally generate a demo crisis.
/// A seed of 0 picks a random seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub seed: u64,
    #[serde(default = "default_name")]
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Share of cells (lowest terrain first) that cannot be entered.
    pub impassable_ratio: f32,
    /// Entry cost of the roughest passable terrain; the smoothest costs 1.
    pub max_cost: i32,
    pub roughness: f32,
    pub faction_count: u32,
    pub divisions_per_faction: u32,
}

fn default_name() -> String {
    "Crisis".to_string()
}

impl ScenarioParams {
    /// Load scenario parameters from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        let params: Self = toml::from_str(&content)
            .map_err(|e| format!("Invalid TOML in {}: {}", path.display(), e))?;
        params.validate()?;
        Ok(params)
    }

    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !(2..=1024).contains(&self.width) || !(2..=1024).contains(&self.height) {
            return Err(format!(
                "width and height must be 2-1024, got {}x{}",
                self.width, self.height
            ));
        }
        if !(0.0..=0.6).contains(&self.impassable_ratio) {
            return Err(format!(
                "impassable_ratio must be 0.0-0.6, got {}",
                self.impassable_ratio
            ));
        }
        if !(1..=100).contains(&self.max_cost) {
            return Err(format!("max_cost must be 1-100, got {}", self.max_cost));
        }
        if !(0.0..=1.0).contains(&self.roughness) {
            return Err(format!(
                "roughness must be 0.0-1.0, got {}",
                self.roughness
            ));
        }
        if !(1..=8).contains(&self.faction_count) {
            return Err(format!(
                "faction_count must be 1-8, got {}",
                self.faction_count
            ));
        }
        if self.divisions_per_faction > 64 {
            return Err(format!(
                "divisions_per_faction must be 0-64, got {}",
                self.divisions_per_faction
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_params() -> ScenarioParams {
    ScenarioParams {
        seed: 42,
        name: "Test Crisis".to_string(),
        width: 24,
        height: 16,
        impassable_ratio: 0.15,
        max_cost: 6,
        roughness: 0.6,
        faction_count: 3,
        divisions_per_faction: 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_params_are_valid() {
        assert!(test_params().validate().is_ok());
    }

    #[test]
    fn out_of_range_values_rejected() {
        let cases: Vec<(ScenarioParams, &str)> = vec![
            (ScenarioParams { width: 1, ..test_params() }, "width"),
            (ScenarioParams { impassable_ratio: 0.9, ..test_params() }, "impassable_ratio"),
            (ScenarioParams { max_cost: 0, ..test_params() }, "max_cost"),
            (ScenarioParams { roughness: 1.5, ..test_params() }, "roughness"),
            (ScenarioParams { faction_count: 0, ..test_params() }, "faction_count"),
            (ScenarioParams { divisions_per_faction: 65, ..test_params() }, "divisions_per_faction"),
        ];
        for (params, field) in cases {
            let err = params.validate().unwrap_err();
            assert!(err.contains(field), "{} not in {}", field, err);
        }
    }

    #[test]
    fn from_file_applies_default_name() {
        let mut tmp = NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(
            tmp,
            "seed = 7\nwidth = 10\nheight = 10\nimpassable_ratio = 0.1\nmax_cost = 4\nroughness = 0.5\nfaction_count = 2\ndivisions_per_faction = 1\n"
        )
        .unwrap();
        let params = ScenarioParams::from_file(tmp.path()).unwrap();
        assert_eq!(params.name, "Crisis");
        assert_eq!(params.seed, 7);
    }

    #[test]
    fn from_file_reports_invalid_toml() {
        let mut tmp = NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(tmp, "seed = ").unwrap();
        let err = ScenarioParams::from_file(tmp.path()).unwrap_err();
        assert!(err.contains("Invalid TOML"));
    }
}
