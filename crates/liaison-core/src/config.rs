//! Configuration management for the liaison workstation

use crate::directory::{SourceEncoding, SourceOptions};
use crate::error::{LiaisonError, Result};
use liaison_types::PeriodGranularity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Raw configuration structure matching liaison.json exactly
#[derive(Debug, Deserialize)]
struct RawConfig {
    pub employees: EmployeesConfig,
    pub assets: AssetsConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(alias = "entreprise")]
    pub company: CompanyInfo,

    // Accept the original tool's French key as well
    #[serde(default, alias = "hopitaux")]
    pub hospitals: Vec<Hospital>,

    #[serde(default)]
    pub letter: LetterConfig,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiaisonConfig {
    pub employees: EmployeesConfig,
    pub assets: AssetsConfig,
    pub ledger: LedgerConfig,
    pub output: OutputConfig,
    pub company: CompanyInfo,
    pub hospitals: Vec<Hospital>,
    pub letter: LetterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeesConfig {
    pub path: PathBuf,

    /// `None` means detect from the header line
    #[serde(default)]
    pub delimiter: Option<char>,

    #[serde(default)]
    pub encoding: SourceEncoding,
}

impl EmployeesConfig {
    pub fn source_options(&self) -> Result<SourceOptions> {
        let delimiter = self
            .delimiter
            .map(|c| {
                u8::try_from(c)
                    .ok()
                    .filter(u8::is_ascii)
                    .ok_or_else(|| LiaisonError::Config(format!("employees.delimiter '{}' is not ASCII", c)))
            })
            .transpose()?;
        Ok(SourceOptions {
            delimiter,
            encoding: self.encoding,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    pub logo: PathBuf,

    #[serde(alias = "cachet")]
    pub stamp: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    #[serde(default)]
    pub period: PeriodGranularity,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            sheet_name: default_sheet_name(),
            period: PeriodGranularity::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_preview_dpi")]
    pub preview_dpi: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            preview_dpi: default_preview_dpi(),
        }
    }
}

/// Issuing company, printed in the letter header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    pub address: String,

    #[serde(default)]
    pub phone: String,

    #[serde(default)]
    pub fax: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hospital {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterConfig {
    #[serde(default = "default_care_type")]
    pub default_care_type: String,

    #[serde(default = "default_nationality")]
    pub nationality: String,
}

impl Default for LetterConfig {
    fn default() -> Self {
        Self {
            default_care_type: default_care_type(),
            nationality: default_nationality(),
        }
    }
}

// Default functions
fn default_ledger_path() -> PathBuf {
    PathBuf::from("Base_LettreLiaison.xlsx")
}

fn default_sheet_name() -> String {
    "Lettres".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_preview_dpi() -> u32 {
    72
}

fn default_care_type() -> String {
    "Consultation médicale".to_string()
}

fn default_nationality() -> String {
    "Tunisienne".to_string()
}

impl LiaisonConfig {
    /// Load configuration from a JSON file.
    ///
    /// Relative paths inside the file resolve against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LiaisonError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_json_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw_config: RawConfig = serde_json::from_str(json)
            .map_err(|e| LiaisonError::Config(format!("Failed to parse config: {}", e)))?;

        let config = Self::from_raw_config(raw_config);
        config.validate()?;
        Ok(config)
    }

    fn from_raw_config(raw: RawConfig) -> Self {
        let hospitals = raw
            .hospitals
            .into_iter()
            .map(|h| Hospital {
                name: h.name.trim().to_string(),
                address: h.address.trim().to_string(),
            })
            .collect();

        Self {
            employees: raw.employees,
            assets: raw.assets,
            ledger: raw.ledger,
            output: raw.output,
            company: raw.company,
            hospitals,
            letter: raw.letter,
        }
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            &mut self.employees.path,
            &mut self.assets.logo,
            &mut self.assets.stamp,
            &mut self.ledger.path,
            &mut self.output.directory,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.employees.path.as_os_str().is_empty() {
            return Err(LiaisonError::Config("employees.path is required".to_string()));
        }

        if self.assets.logo.as_os_str().is_empty() || self.assets.stamp.as_os_str().is_empty() {
            return Err(LiaisonError::Config(
                "assets.logo and assets.stamp are required".to_string(),
            ));
        }

        if self.company.name.trim().is_empty() {
            return Err(LiaisonError::Config("company.name is required".to_string()));
        }

        if self.ledger.sheet_name.trim().is_empty() {
            return Err(LiaisonError::Config("ledger.sheet_name is required".to_string()));
        }

        if !(18..=600).contains(&self.output.preview_dpi) {
            return Err(LiaisonError::Config(format!(
                "output.preview_dpi must be between 18 and 600, got {}",
                self.output.preview_dpi
            )));
        }

        if let Some(delimiter) = self.employees.delimiter {
            if !delimiter.is_ascii() {
                return Err(LiaisonError::Config(format!(
                    "employees.delimiter must be a single ASCII character, got '{}'",
                    delimiter
                )));
            }
        }

        let mut seen = HashSet::new();
        for hospital in &self.hospitals {
            if hospital.name.is_empty() {
                return Err(LiaisonError::Config("hospital name is required".to_string()));
            }
            if !seen.insert(hospital.name.to_lowercase()) {
                return Err(LiaisonError::Config(format!(
                    "hospital '{}' is listed twice",
                    hospital.name
                )));
            }
        }

        Ok(())
    }

}

/// Catalogue entry for a hospital name, ignoring case and surrounding spaces
pub fn find_hospital<'a>(hospitals: &'a [Hospital], name: &str) -> Option<&'a Hospital> {
    let name = name.trim().to_lowercase();
    hospitals.iter().find(|h| h.name.trim().to_lowercase() == name)
}
