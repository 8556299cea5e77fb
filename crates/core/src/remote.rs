//! Read-only client for the remote clinical-data server.
//!
//! The add-on flow needs two things from the server: the patient resource, looked up by
//! identifier, and the name of the practice that patient belongs to. Practice lookup is best
//! effort and never fails the run.

use crate::constants::{DEFAULT_REMOTE_SUFFIX, REMOTE_TIMEOUT, UNKNOWN_PRACTICE};
use crate::{CoreError, CoreResult};
use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::Value;

/// Normalises a server argument to a base URL without a trailing slash.
///
/// - `http://…` / `https://…` are kept as given
/// - `host:port` becomes `http://host:port`
/// - a bare host becomes `http://host:8080/fhir`
pub fn normalise_base_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else if server.contains(':') {
        format!("http://{server}")
    } else {
        format!("http://{server}{DEFAULT_REMOTE_SUFFIX}")
    }
}

/// Practice the patient is registered with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Practice {
    pub name: String,
    /// Organization id on the server, when one was found.
    pub id: Option<String>,
}

impl Practice {
    fn unknown() -> Self {
        Self {
            name: UNKNOWN_PRACTICE.to_string(),
            id: None,
        }
    }
}

pub struct RemoteClient {
    base: String,
    client: Client,
}

impl RemoteClient {
    pub fn new(server: &str) -> CoreResult<Self> {
        let base = normalise_base_url(server);
        let client = Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|source| CoreError::Http {
                url: base.clone(),
                source,
            })?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> CoreResult<Url> {
        let raw = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| CoreError::InvalidInput(format!("invalid server URL '{raw}': {e}")))
    }

    fn get_json(&self, url: Url) -> CoreResult<Value> {
        tracing::debug!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .header("Accept", "application/fhir+json")
            .send()
            .map_err(|source| CoreError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().map_err(|source| CoreError::Http {
            url: url.to_string(),
            source,
        })
    }

    /// Looks up a patient by identifier.
    ///
    /// # Errors
    ///
    /// Network and HTTP failures are returned as is. A search with no match returns
    /// `CoreError::PatientNotFound`.
    pub fn fetch_patient(&self, patient_id: &str) -> CoreResult<Value> {
        let url = self.url("Patient", &[("identifier", patient_id)])?;
        let bundle = self.get_json(url)?;

        if bundle.get("total").and_then(Value::as_u64) == Some(0) {
            return Err(CoreError::PatientNotFound(patient_id.to_string()));
        }
        let patient = first_entry(&bundle)
            .cloned()
            .ok_or_else(|| CoreError::PatientNotFound(patient_id.to_string()))?;

        tracing::info!("found patient {patient_id} on {}", self.base);
        Ok(patient)
    }

    /// Finds the patient's practice.
    ///
    /// Tries the managing organization, then the service provider of the most recent encounter,
    /// then the organization of the general practitioner's role. Falls back to
    /// "Unknown Practice" when every lookup fails.
    pub fn fetch_practice(&self, patient: &Value) -> Practice {
        let lookups: [(&str, fn(&Self, &Value) -> CoreResult<Option<String>>); 3] = [
            ("managing organization", Self::managing_organization),
            ("latest encounter", Self::latest_encounter_provider),
            ("general practitioner", Self::practitioner_organization),
        ];

        for (source, lookup) in lookups {
            match lookup(self, patient) {
                Ok(Some(reference)) => match self.organization(&reference) {
                    Ok(practice) => {
                        tracing::info!("practice '{}' found via {source}", practice.name);
                        return practice;
                    }
                    Err(e) => tracing::warn!("organization lookup via {source} failed: {e}"),
                },
                Ok(None) => tracing::debug!("no organization via {source}"),
                Err(e) => tracing::warn!("organization lookup via {source} failed: {e}"),
            }
        }

        tracing::warn!("no practice found, using '{UNKNOWN_PRACTICE}'");
        Practice::unknown()
    }

    fn managing_organization(&self, patient: &Value) -> CoreResult<Option<String>> {
        Ok(reference_of(patient, "managingOrganization"))
    }

    fn latest_encounter_provider(&self, patient: &Value) -> CoreResult<Option<String>> {
        let Some(patient_id) = patient.get("id").and_then(Value::as_str) else {
            return Ok(None);
        };
        let subject = format!("Patient/{patient_id}");
        let url = self.url(
            "Encounter",
            &[("patient", subject.as_str()), ("_count", "1"), ("_sort", "-date")],
        )?;
        let bundle = self.get_json(url)?;
        Ok(first_entry(&bundle).and_then(|encounter| reference_of(encounter, "serviceProvider")))
    }

    fn practitioner_organization(&self, patient: &Value) -> CoreResult<Option<String>> {
        let Some(practitioner) = patient
            .get("generalPractitioner")
            .and_then(Value::as_array)
            .and_then(|gps| gps.first())
            .and_then(|gp| gp.get("reference"))
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let practitioner_id = practitioner.rsplit('/').next().unwrap_or(practitioner);
        let url = self.url("PractitionerRole", &[("practitioner", practitioner_id)])?;
        let bundle = self.get_json(url)?;
        Ok(first_entry(&bundle).and_then(|role| reference_of(role, "organization")))
    }

    fn organization(&self, reference: &str) -> CoreResult<Practice> {
        let url = self.organization_url(reference)?;
        let organization = self.get_json(url)?;
        let name = organization
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_PRACTICE)
            .to_string();
        let id = organization
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Practice { name, id })
    }

    /// Absolute references are used as given, anything else is read as an Organization id.
    fn organization_url(&self, reference: &str) -> CoreResult<Url> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Url::parse(reference).map_err(|e| {
                CoreError::InvalidInput(format!("invalid organization reference '{reference}': {e}"))
            });
        }
        let id = reference.strip_prefix("Organization/").unwrap_or(reference);
        self.url(&format!("Organization/{id}"), &[])
    }
}

fn first_entry(bundle: &Value) -> Option<&Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("resource"))
}

fn reference_of(resource: &Value, field: &str) -> Option<String> {
    resource
        .get(field)
        .and_then(|r| r.get("reference"))
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}
