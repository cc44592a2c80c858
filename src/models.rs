use crate::errors::AppError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============ Enumerated certificate values ============

/// How the physician saw the patient ("tipo visita").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitType {
    #[serde(rename = "Ambulatoriale")]
    Outpatient,
    #[serde(rename = "Domiciliare")]
    Home,
    #[serde(rename = "Pronto Soccorso")]
    EmergencyRoom,
}

impl VisitType {
    /// Label printed by the portal.
    pub fn label(&self) -> &'static str {
        match self {
            VisitType::Outpatient => "Ambulatoriale",
            VisitType::Home => "Domiciliare",
            VisitType::EmergencyRoom => "Pronto Soccorso",
        }
    }
}

/// Whether the certificate opens, continues or reopens an illness ("tipo certificato").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateType {
    #[serde(rename = "Inizio")]
    Start,
    #[serde(rename = "Continuazione")]
    Continuation,
    #[serde(rename = "Ricaduta")]
    Relapse,
}

impl CertificateType {
    pub fn label(&self) -> &'static str {
        match self {
            CertificateType::Start => "Inizio",
            CertificateType::Continuation => "Continuazione",
            CertificateType::Relapse => "Ricaduta",
        }
    }
}

/// Reason for an exemption from the inspection-visit hours ("agevolazione").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Benefit {
    #[serde(rename = "Patologia grave che richiede terapia salvavita")]
    LifeSavingTherapy,
    #[serde(rename = "Malattia per la quale è stata riconosciuta la causa di servizio")]
    ServiceRelatedCause,
    #[serde(
        rename = "Stato patologico sotteso o connesso alla situazione di invalidità riconosciuta"
    )]
    RecognizedDisability,
}

impl Benefit {
    pub fn label(&self) -> &'static str {
        match self {
            Benefit::LifeSavingTherapy => "Patologia grave che richiede terapia salvavita",
            Benefit::ServiceRelatedCause => {
                "Malattia per la quale è stata riconosciuta la causa di servizio"
            }
            Benefit::RecognizedDisability => {
                "Stato patologico sotteso o connesso alla situazione di invalidità riconosciuta"
            }
        }
    }
}

// ============ Certificate ============

/// Every field decoded from the certificate page.
///
/// Keys serialize with the portal's own (Italian) names. Fields that the page
/// did not provide stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateData {
    // Person
    #[serde(rename = "codice_fiscale")]
    pub fiscal_code: Option<String>,
    #[serde(rename = "cognome")]
    pub surname: Option<String>,
    #[serde(rename = "nome")]
    pub first_name: Option<String>,
    #[serde(rename = "data_nascita")]
    pub birth_date: Option<String>,
    #[serde(rename = "sesso")]
    pub sex: Option<String>,
    #[serde(rename = "provincia_nascita")]
    pub birth_province: Option<String>,
    #[serde(rename = "comune_nascita")]
    pub birth_municipality: Option<String>,
    #[serde(rename = "via_residenza")]
    pub residence_street: Option<String>,
    #[serde(rename = "civico_residenza")]
    pub residence_house_number: Option<String>,
    #[serde(rename = "provincia_residenza")]
    pub residence_province: Option<String>,
    #[serde(rename = "comune_residenza")]
    pub residence_municipality: Option<String>,
    #[serde(rename = "cap_residenza")]
    pub residence_postal_code: Option<String>,

    // Availability for inspection ("reperibilità")
    #[serde(rename = "reperibilita_a_cura_di")]
    pub availability_care_of: Option<String>,
    #[serde(rename = "reperibilita_indirizzo")]
    pub availability_street: Option<String>,
    #[serde(rename = "reperibilita_civico")]
    pub availability_house_number: Option<String>,
    #[serde(rename = "reperibilita_provincia")]
    pub availability_province: Option<String>,
    #[serde(rename = "reperibilita_comune")]
    pub availability_municipality: Option<String>,
    #[serde(rename = "reperibilita_cap")]
    pub availability_postal_code: Option<String>,

    // Illness
    #[serde(rename = "ammalato_dal")]
    pub illness_start: Option<String>,
    #[serde(rename = "data_rilascio_certificato")]
    pub issue_date: Option<String>,
    #[serde(rename = "ammalato_al")]
    pub illness_end: Option<String>,
    #[serde(rename = "tipo_visita")]
    pub visit_type: Option<VisitType>,
    #[serde(rename = "tipo_certificato")]
    pub certificate_type: Option<CertificateType>,
    #[serde(rename = "inizio_giorno_successivo_visita")]
    pub starts_day_after_visit: bool,
    #[serde(rename = "causa_evento_traumatico")]
    pub traumatic_event: bool,
    #[serde(rename = "agevolazione")]
    pub benefit: Option<Benefit>,

    // Physician
    #[serde(rename = "cognome_medico")]
    pub physician_surname: Option<String>,
    #[serde(rename = "nome_medico")]
    pub physician_first_name: Option<String>,
    #[serde(rename = "ruolo_medico")]
    pub physician_role: Option<String>,
    #[serde(rename = "codice_regione_medico")]
    pub physician_region_code: Option<String>,
    #[serde(rename = "codice_asl_medico")]
    pub physician_asl_code: Option<String>,
    #[serde(rename = "codice_struttura")]
    pub facility_code: Option<String>,
}

/// A value returned by the name-based field lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(Option<&'a str>),
    Flag(bool),
}

impl FieldValue<'_> {
    /// Plain-text rendering; unset values render as an empty string.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Text(value) => value.unwrap_or_default().to_string(),
            FieldValue::Flag(flag) => flag.to_string(),
        }
    }
}

/// One certificate downloaded from the portal.
///
/// Built in one shot by the client and read-only afterwards. The page it was
/// decoded from is kept for diagnostics but is not part of the exported record.
#[derive(Debug, Clone)]
pub struct Certificate {
    protocol: String,
    data: CertificateData,
    pdf: Option<String>,
    html: String,
}

/// Exported form of a [`Certificate`]: the decoded fields, the protocol number
/// and the base64 PDF, if one was downloaded.
#[derive(Debug, Serialize)]
pub struct CertificateRecord<'a> {
    #[serde(flatten)]
    pub data: &'a CertificateData,
    #[serde(rename = "protocollo")]
    pub protocol: &'a str,
    pub pdf: Option<&'a str>,
}

impl Certificate {
    pub fn new(protocol: String, data: CertificateData, pdf: Option<String>, html: String) -> Self {
        Self {
            protocol,
            data,
            pdf,
            html,
        }
    }

    /// Protocol number supplied by the caller.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn data(&self) -> &CertificateData {
        &self.data
    }

    /// Base64 of the PDF, when the certificate was fetched with the PDF.
    pub fn pdf(&self) -> Option<&str> {
        self.pdf.as_deref()
    }

    /// Decodes the stored PDF.
    pub fn pdf_bytes(&self) -> Result<Option<Vec<u8>>, AppError> {
        self.pdf
            .as_deref()
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| AppError::InternalError(format!("Stored PDF is not base64: {}", e)))
            })
            .transpose()
    }

    /// Flattened page the fields were decoded from.
    ///
    /// Diagnostics only: it lets a layout change be inspected after the fact.
    /// It is never part of [`Certificate::record`] or the serialized form.
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn record(&self) -> CertificateRecord<'_> {
        CertificateRecord {
            data: &self.data,
            protocol: &self.protocol,
            pdf: self.pdf.as_deref(),
        }
    }

    /// Looks a field up by its exported name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::PropertyNotFound`] if no field has that name.
    pub fn field(&self, name: &str) -> Result<FieldValue<'_>, AppError> {
        fn text(value: &Option<String>) -> FieldValue<'_> {
            FieldValue::Text(value.as_deref())
        }

        let d = &self.data;

        let value = match name {
            "codice_fiscale" => text(&d.fiscal_code),
            "cognome" => text(&d.surname),
            "nome" => text(&d.first_name),
            "data_nascita" => text(&d.birth_date),
            "sesso" => text(&d.sex),
            "provincia_nascita" => text(&d.birth_province),
            "comune_nascita" => text(&d.birth_municipality),
            "via_residenza" => text(&d.residence_street),
            "civico_residenza" => text(&d.residence_house_number),
            "provincia_residenza" => text(&d.residence_province),
            "comune_residenza" => text(&d.residence_municipality),
            "cap_residenza" => text(&d.residence_postal_code),
            "reperibilita_a_cura_di" => text(&d.availability_care_of),
            "reperibilita_indirizzo" => text(&d.availability_street),
            "reperibilita_civico" => text(&d.availability_house_number),
            "reperibilita_provincia" => text(&d.availability_province),
            "reperibilita_comune" => text(&d.availability_municipality),
            "reperibilita_cap" => text(&d.availability_postal_code),
            "ammalato_dal" => text(&d.illness_start),
            "data_rilascio_certificato" => text(&d.issue_date),
            "ammalato_al" => text(&d.illness_end),
            "tipo_visita" => FieldValue::Text(d.visit_type.map(|v| v.label())),
            "tipo_certificato" => FieldValue::Text(d.certificate_type.map(|v| v.label())),
            "inizio_giorno_successivo_visita" => FieldValue::Flag(d.starts_day_after_visit),
            "causa_evento_traumatico" => FieldValue::Flag(d.traumatic_event),
            "agevolazione" => FieldValue::Text(d.benefit.map(|v| v.label())),
            "cognome_medico" => text(&d.physician_surname),
            "nome_medico" => text(&d.physician_first_name),
            "ruolo_medico" => text(&d.physician_role),
            "codice_regione_medico" => text(&d.physician_region_code),
            "codice_asl_medico" => text(&d.physician_asl_code),
            "codice_struttura" => text(&d.facility_code),
            "protocollo" => FieldValue::Text(Some(self.protocol.as_str())),
            "pdf" => FieldValue::Text(self.pdf.as_deref()),
            _ => return Err(AppError::PropertyNotFound(name.to_string())),
        };

        Ok(value)
    }
}

impl Serialize for Certificate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.record().serialize(serializer)
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.protocol)
    }
}

// ============ API Request/Response Models ============

/// Answer to a CAPTCHA request: the session to keep using and the image to solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    /// Value of the portal's session cookie.
    pub session_id: String,
    /// Base64 of the PNG image.
    pub captcha: String,
}

/// Request payload for fetching a certificate.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateRequest {
    /// Session returned together with the CAPTCHA.
    pub session_id: String,
    /// Solution of the CAPTCHA.
    pub captcha: String,
    /// Fiscal code of the certified person.
    pub fiscal_code: String,
    /// Protocol number of the certificate.
    pub protocol_number: String,
    /// Also download the PDF.
    #[serde(default)]
    pub pdf: bool,
}
