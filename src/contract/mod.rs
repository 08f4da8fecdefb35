//! Contract variants and template selection

mod selector;

pub use selector::{
    document_name, normalize, select, select_template, ContractType, Selection, SkipReason,
};

/// Spreadsheet column names the generator reads
pub mod columns {
    /// Contract type for the whole batch (read from the first row)
    pub const CONTRACT_TYPE: &str = "Tarif";
    /// Commodity: gas or electricity
    pub const COMMODITY: &str = "Gas oder Strom";
    /// Contract duration in months
    pub const DURATION: &str = "Laufzeit";
    /// Meter type, used by spot contracts
    pub const COUNTER_TYPE: &str = "Zählerart";
    /// Company name; also a form field in every template
    pub const COMPANY: &str = "###company###";
}
