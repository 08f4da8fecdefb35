//! PDF processing layer
//!
//! This module provides AcroForm field discovery and filling using lopdf.

mod form;

pub use form::{
    extract_field_values, extract_fields, fill_form, FieldValues, FillSummary, FilledForm,
    FormTemplate,
};
