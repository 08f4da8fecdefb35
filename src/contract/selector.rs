use serde::Serialize;
use std::fmt;

/// Top-level billing plan category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContractType {
    Portfolio,
    Spot,
}

impl ContractType {
    /// Parse the spreadsheet spelling; anything but the two known values is `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Portfolio-Tarif" => Some(ContractType::Portfolio),
            "Spot-Tarif" => Some(ContractType::Spot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Portfolio => "Portfolio-Tarif",
            ContractType::Spot => "Spot-Tarif",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a row produced no document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SkipReason {
    EmptyRow,
    UnknownContractType(String),
    UnsupportedDuration(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyRow => f.write_str("empty row"),
            SkipReason::UnknownContractType(t) => write!(f, "unknown contract type \"{}\"", t),
            SkipReason::UnsupportedDuration(d) => write!(f, "unsupported duration \"{}\"", d),
        }
    }
}

/// Outcome of template selection for one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Template(String),
    Skip(SkipReason),
}

impl Selection {
    pub fn template(self) -> Option<String> {
        match self {
            Selection::Template(name) => Some(name),
            Selection::Skip(_) => None,
        }
    }
}

/// Trim and lowercase a categorical value
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Replace path separators so a value interpolated into a file name stays a base name
fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// Pick the template file for a row.
///
/// | contract type   | duration | template                                      |
/// |-----------------|----------|-----------------------------------------------|
/// | Portfolio-Tarif | 12 / 24  | `portfolio_tarif_template_{commodity}_{d}.pdf` |
/// | Portfolio-Tarif | other    | skip                                          |
/// | Spot-Tarif      | any      | `spot_tarif_template_{commodity}_{counter}.pdf` |
/// | other           |          | skip                                          |
pub fn select(contract_type: &str, commodity: &str, duration: &str, counter_type: &str) -> Selection {
    let Some(kind) = ContractType::parse(contract_type) else {
        return Selection::Skip(SkipReason::UnknownContractType(
            contract_type.trim().to_string(),
        ));
    };

    let commodity = path_safe(&normalize(commodity));
    match kind {
        ContractType::Portfolio => match duration.trim() {
            d @ ("12" | "24") => {
                Selection::Template(format!("portfolio_tarif_template_{}_{}.pdf", commodity, d))
            }
            other => Selection::Skip(SkipReason::UnsupportedDuration(other.to_string())),
        },
        ContractType::Spot => Selection::Template(format!(
            "spot_tarif_template_{}_{}.pdf",
            commodity,
            path_safe(&normalize(counter_type))
        )),
    }
}

/// Template file name for a row, `None` when the row should be skipped
pub fn select_template(
    contract_type: &str,
    commodity: &str,
    duration: &str,
    counter_type: &str,
) -> Option<String> {
    select(contract_type, commodity, duration, counter_type).template()
}

/// Output file name for a generated contract.
/// Path separators in the company name are replaced so the result stays a base name.
pub fn document_name(company: &str, contract_type: &str) -> String {
    format!("{} Antrag {}.pdf", path_safe(company), contract_type.trim())
}
