//! Decoding of the certificate page.
//!
//! The portal renders the certificate as a plain HTML table without ids or
//! names, so fields are located by position: every `<td>` cell is captured in
//! document order and a static table maps cell indices to certificate fields.
//!
//! Each [`Rule`] names the cell index, the target [`Field`], how the raw cell
//! is turned into a value ([`PostProcess`]) and whether a falsy result may
//! overwrite the field (`only_truthy`). Radio groups use one rule per option,
//! all targeting the same field with `only_truthy` set, so an unchecked option
//! processed later never erases the checked one.
//!
//! A page that does not match the layout fails with
//! [`AppError::BadResponse`]; nothing is guessed.

use crate::errors::{AppError, MSG_BAD_RESPONSE};
use crate::models::{Benefit, CertificateData, CertificateType, VisitType};
use regex::Regex;
use std::sync::LazyLock;

/// Content of a table cell, from `<td ...>` to the next `</td ...>`.
pub const CELL_PATTERN: &str = r"(?i)<td[^>]*>(.*?)</td[^>]*>";

/// Text the portal prints when the CAPTCHA or the identifiers are rejected.
pub const REJECTION_MARKER: &str = "Codice di controllo";

static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CELL_PATTERN).expect("cell pattern is valid"));
static VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)value="([^"]+)""#).expect("value pattern is valid"));
static CHECKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)checked").expect("checked pattern is valid"));
static REJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){}", regex::escape(REJECTION_MARKER)))
        .expect("rejection pattern is valid")
});

/// Certificate field a rule writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    FiscalCode,
    Surname,
    FirstName,
    BirthDate,
    Sex,
    BirthProvince,
    BirthMunicipality,
    ResidenceStreet,
    ResidenceHouseNumber,
    ResidenceProvince,
    ResidenceMunicipality,
    ResidencePostalCode,
    AvailabilityCareOf,
    AvailabilityStreet,
    AvailabilityHouseNumber,
    AvailabilityProvince,
    AvailabilityMunicipality,
    AvailabilityPostalCode,
    IllnessStart,
    IssueDate,
    IllnessEnd,
    VisitType,
    CertificateType,
    StartsDayAfterVisit,
    TraumaticEvent,
    Benefit,
    PhysicianSurname,
    PhysicianFirstName,
    PhysicianRole,
    PhysicianRegionCode,
    PhysicianAslCode,
    FacilityCode,
}

impl Field {
    fn text_slot<'a>(&self, data: &'a mut CertificateData) -> Option<&'a mut Option<String>> {
        let slot = match self {
            Field::FiscalCode => &mut data.fiscal_code,
            Field::Surname => &mut data.surname,
            Field::FirstName => &mut data.first_name,
            Field::BirthDate => &mut data.birth_date,
            Field::Sex => &mut data.sex,
            Field::BirthProvince => &mut data.birth_province,
            Field::BirthMunicipality => &mut data.birth_municipality,
            Field::ResidenceStreet => &mut data.residence_street,
            Field::ResidenceHouseNumber => &mut data.residence_house_number,
            Field::ResidenceProvince => &mut data.residence_province,
            Field::ResidenceMunicipality => &mut data.residence_municipality,
            Field::ResidencePostalCode => &mut data.residence_postal_code,
            Field::AvailabilityCareOf => &mut data.availability_care_of,
            Field::AvailabilityStreet => &mut data.availability_street,
            Field::AvailabilityHouseNumber => &mut data.availability_house_number,
            Field::AvailabilityProvince => &mut data.availability_province,
            Field::AvailabilityMunicipality => &mut data.availability_municipality,
            Field::AvailabilityPostalCode => &mut data.availability_postal_code,
            Field::IllnessStart => &mut data.illness_start,
            Field::IssueDate => &mut data.issue_date,
            Field::IllnessEnd => &mut data.illness_end,
            Field::PhysicianSurname => &mut data.physician_surname,
            Field::PhysicianFirstName => &mut data.physician_first_name,
            Field::PhysicianRole => &mut data.physician_role,
            Field::PhysicianRegionCode => &mut data.physician_region_code,
            Field::PhysicianAslCode => &mut data.physician_asl_code,
            Field::FacilityCode => &mut data.facility_code,
            Field::VisitType
            | Field::CertificateType
            | Field::StartsDayAfterVisit
            | Field::TraumaticEvent
            | Field::Benefit => return None,
        };
        Some(slot)
    }

    fn flag_slot<'a>(&self, data: &'a mut CertificateData) -> Option<&'a mut bool> {
        match self {
            Field::StartsDayAfterVisit => Some(&mut data.starts_day_after_visit),
            Field::TraumaticEvent => Some(&mut data.traumatic_event),
            _ => None,
        }
    }
}

/// Option of a radio group, carried by the rule of the cell that renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Visit(VisitType),
    Certificate(CertificateType),
    Benefit(Benefit),
}

/// How a raw cell becomes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    /// Display text, surrounding whitespace removed.
    Trim,
    /// `value="..."` attribute of an `<input>`; empty when absent.
    InputValue,
    /// Whether the checkbox is checked.
    Checked,
    /// The given option when the radio button is checked, nothing otherwise.
    CheckedAs(Choice),
}

/// Result of post-processing one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Flag(bool),
    Choice(Option<Choice>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Text(text) => !text.is_empty(),
            Value::Flag(flag) => *flag,
            Value::Choice(choice) => choice.is_some(),
        }
    }
}

impl PostProcess {
    pub fn apply(&self, cell: &str) -> Value {
        match self {
            PostProcess::Trim => Value::Text(cell.trim().to_string()),
            PostProcess::InputValue => Value::Text(input_value(cell)),
            PostProcess::Checked => Value::Flag(is_checked(cell)),
            PostProcess::CheckedAs(choice) => Value::Choice(is_checked(cell).then_some(*choice)),
        }
    }
}

/// One entry of the index-to-field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub index: usize,
    pub field: Field,
    pub process: PostProcess,
    pub only_truthy: bool,
}

const fn text(index: usize, field: Field) -> Rule {
    Rule {
        index,
        field,
        process: PostProcess::Trim,
        only_truthy: false,
    }
}

const fn input(index: usize, field: Field) -> Rule {
    Rule {
        index,
        field,
        process: PostProcess::InputValue,
        only_truthy: false,
    }
}

const fn checkbox(index: usize, field: Field) -> Rule {
    Rule {
        index,
        field,
        process: PostProcess::Checked,
        only_truthy: false,
    }
}

const fn radio(index: usize, field: Field, choice: Choice) -> Rule {
    Rule {
        index,
        field,
        process: PostProcess::CheckedAs(choice),
        only_truthy: true,
    }
}

/// Cell layout of the certificate page, in ascending index order.
///
/// Index 68 appears twice: the page's benefit radio group is mapped as it
/// has always been, so a checked cell 68 resolves to
/// [`Benefit::RecognizedDisability`] and [`Benefit::ServiceRelatedCause`] is
/// never produced.
pub static RULES: &[Rule] = &[
    text(5, Field::FiscalCode),
    text(7, Field::Surname),
    text(9, Field::FirstName),
    text(11, Field::BirthDate),
    text(13, Field::Sex),
    text(15, Field::BirthProvince),
    text(17, Field::BirthMunicipality),
    text(19, Field::ResidenceStreet),
    text(21, Field::ResidenceHouseNumber),
    text(23, Field::ResidenceProvince),
    text(25, Field::ResidenceMunicipality),
    text(27, Field::ResidencePostalCode),
    text(29, Field::AvailabilityCareOf),
    text(31, Field::AvailabilityStreet),
    text(33, Field::AvailabilityHouseNumber),
    text(35, Field::AvailabilityProvince),
    text(37, Field::AvailabilityMunicipality),
    text(39, Field::AvailabilityPostalCode),
    input(41, Field::IllnessStart),
    input(43, Field::IssueDate),
    input(45, Field::IllnessEnd),
    radio(47, Field::VisitType, Choice::Visit(VisitType::Outpatient)),
    radio(49, Field::VisitType, Choice::Visit(VisitType::Home)),
    radio(51, Field::VisitType, Choice::Visit(VisitType::EmergencyRoom)),
    radio(54, Field::CertificateType, Choice::Certificate(CertificateType::Start)),
    radio(56, Field::CertificateType, Choice::Certificate(CertificateType::Continuation)),
    radio(58, Field::CertificateType, Choice::Certificate(CertificateType::Relapse)),
    checkbox(61, Field::StartsDayAfterVisit),
    checkbox(63, Field::TraumaticEvent),
    radio(66, Field::Benefit, Choice::Benefit(Benefit::LifeSavingTherapy)),
    radio(68, Field::Benefit, Choice::Benefit(Benefit::ServiceRelatedCause)),
    radio(68, Field::Benefit, Choice::Benefit(Benefit::RecognizedDisability)),
    input(72, Field::PhysicianSurname),
    input(74, Field::PhysicianFirstName),
    input(76, Field::PhysicianRole),
    input(78, Field::PhysicianRegionCode),
    input(80, Field::PhysicianAslCode),
    input(82, Field::FacilityCode),
];

/// Removes newlines so the cell pattern sees the page as a single line.
pub fn flatten(body: &str) -> String {
    body.replace('\n', "")
}

/// Whether the page is the portal's CAPTCHA/identifier rejection page.
///
/// This is a plain case-insensitive substring search, so a certificate page
/// that happened to contain the marker would be reported as a rejection.
pub fn is_rejection(html: &str) -> bool {
    REJECTION_RE.is_match(html)
}

fn input_value(cell: &str) -> String {
    VALUE_RE
        .captures(cell)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn is_checked(cell: &str) -> bool {
    CHECKED_RE.is_match(cell)
}

/// Captures the content of every table cell, in document order.
///
/// # Errors
///
/// Returns [`AppError::BadResponse`] if the page has no cells at all.
pub fn extract_cells(html: &str) -> Result<Vec<&str>, AppError> {
    let cells: Vec<&str> = CELL_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();

    if cells.is_empty() {
        return Err(AppError::BadResponse(format!(
            "{}: no table cells found",
            MSG_BAD_RESPONSE
        )));
    }

    tracing::debug!("Certificate page has {} table cells", cells.len());
    Ok(cells)
}

/// Decodes a flattened certificate page with the standard [`RULES`].
pub fn extract(html: &str) -> Result<CertificateData, AppError> {
    extract_with(html, RULES)
}

/// Decodes a flattened page with the given rules, applied in order.
///
/// # Errors
///
/// Returns [`AppError::BadResponse`] if the page has no cells or lacks a cell
/// one of the rules points at.
pub fn extract_with(html: &str, rules: &[Rule]) -> Result<CertificateData, AppError> {
    let cells = extract_cells(html)?;
    let mut data = CertificateData::default();

    for rule in rules {
        let cell = cells.get(rule.index).ok_or_else(|| {
            AppError::BadResponse(format!(
                "{}: expected cell {} for {:?}, page has {} cells",
                MSG_BAD_RESPONSE,
                rule.index,
                rule.field,
                cells.len()
            ))
        })?;

        let value = rule.process.apply(cell);
        if rule.only_truthy && !value.is_truthy() {
            continue;
        }

        assign(&mut data, rule.field, value)?;
    }

    Ok(data)
}

fn assign(data: &mut CertificateData, field: Field, value: Value) -> Result<(), AppError> {
    let mismatch = |value: &Value| {
        AppError::InternalError(format!("Rule for {:?} produced {:?}", field, value))
    };

    match value {
        Value::Text(text) => match field.text_slot(data) {
            Some(slot) => *slot = Some(text),
            None => return Err(mismatch(&Value::Text(text))),
        },
        Value::Flag(flag) => match field.flag_slot(data) {
            Some(slot) => *slot = flag,
            None => return Err(mismatch(&Value::Flag(flag))),
        },
        Value::Choice(choice) => match (field, choice) {
            (Field::VisitType, None) => data.visit_type = None,
            (Field::VisitType, Some(Choice::Visit(v))) => data.visit_type = Some(v),
            (Field::CertificateType, None) => data.certificate_type = None,
            (Field::CertificateType, Some(Choice::Certificate(v))) => {
                data.certificate_type = Some(v)
            }
            (Field::Benefit, None) => data.benefit = None,
            (Field::Benefit, Some(Choice::Benefit(v))) => data.benefit = Some(v),
            (_, choice) => return Err(mismatch(&Value::Choice(choice))),
        },
    }

    Ok(())
}
