// src/warehouse/copy.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::quote_literal;
use crate::error::{EtlError, Result};

/// Layout of a staged object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum FileFormat {
    Csv {
        #[serde(default = "default_delimiter")]
        delimiter: char,
        #[serde(default = "default_ignore_header")]
        ignore_header: u32,
    },
    Parquet,
}

fn default_delimiter() -> char {
    ','
}

fn default_ignore_header() -> u32 {
    1
}

static IAM_ROLE_ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:iam::\d{12}:role/[\w+=,.@/-]+$")
        .expect("IAM role pattern is valid")
});

/// A validated IAM role ARN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IamRole(String);

impl IamRole {
    pub fn parse(arn: &str) -> Result<Self> {
        let arn = arn.trim();
        if IAM_ROLE_ARN.is_match(arn) {
            Ok(Self(arn.to_string()))
        } else {
            Err(EtlError::InvalidIamRole(arn.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IamRole {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self> {
        IamRole::parse(&value)
    }
}

impl From<IamRole> for String {
    fn from(role: IamRole) -> Self {
        role.0
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How the warehouse authenticates against the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyCredentials {
    AccessKeys(AccessKeys),
    IamRole(IamRole),
    /// Whatever the warehouse process already has (local files, instance profile).
    Ambient,
}

/// One bulk copy: object at `location` into `table`.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub table: String,
    pub location: String,
    pub format: FileFormat,
    pub credentials: CopyCredentials,
}

impl CopyRequest {
    /// Redshift `COPY` statement. Contains secrets; never log the result.
    pub fn to_redshift_sql(&self) -> Result<String> {
        let table = super::validate_identifier(&self.table)?;

        let credentials = match &self.credentials {
            CopyCredentials::AccessKeys(keys) => {
                let mut s = format!(
                    "ACCESS_KEY_ID {} SECRET_ACCESS_KEY {}",
                    quote_literal(&keys.access_key_id),
                    quote_literal(&keys.secret_access_key)
                );
                if let Some(token) = &keys.session_token {
                    s.push_str(&format!(" SESSION_TOKEN {}", quote_literal(token)));
                }
                s
            }
            CopyCredentials::IamRole(role) => {
                // re-checked here: the role may have been built by hand
                let role = IamRole::parse(role.as_str())?;
                format!("IAM_ROLE {}", quote_literal(role.as_str()))
            }
            CopyCredentials::Ambient => {
                return Err(EtlError::MissingCredentials {
                    table: self.table.clone(),
                    location: self.location.clone(),
                })
            }
        };

        let mut parts = vec![
            format!("COPY {}", table),
            format!("FROM {}", quote_literal(&self.location)),
            credentials,
        ];
        match &self.format {
            FileFormat::Csv {
                delimiter,
                ignore_header,
            } => {
                parts.push("CSV".to_string());
                if *ignore_header > 0 {
                    parts.push(format!("IGNOREHEADER {}", ignore_header));
                }
                parts.push(format!("DELIMITER {}", quote_literal(&delimiter.to_string())));
            }
            FileFormat::Parquet => parts.push("FORMAT AS PARQUET".to_string()),
        }
        parts.push("COMPUPDATE OFF".to_string());
        Ok(parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role() -> IamRole {
        IamRole::parse("arn:aws:iam::123456789012:role/dwhRole").unwrap()
    }

    #[test]
    fn test_iam_role_validation() {
        assert!(IamRole::parse(" arn:aws:iam::123456789012:role/dwhRole ").is_ok());
        assert!(IamRole::parse("arn:aws-cn:iam::123456789012:role/path/to/Role").is_ok());
        for bad in [
            "",
            "dwhRole",
            "arn:aws:iam::12345:role/dwhRole",
            "arn:aws:iam::123456789012:user/bob",
            "arn:aws:iam::123456789012:role/x' CREDENTIALS 'y",
        ] {
            assert!(
                matches!(IamRole::parse(bad), Err(EtlError::InvalidIamRole(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parquet_copy_with_role() {
        let req = CopyRequest {
            table: "public.staging_immigration".into(),
            location: "s3://bucket/sas_data".into(),
            format: FileFormat::Parquet,
            credentials: CopyCredentials::IamRole(role()),
        };
        assert_eq!(
            req.to_redshift_sql().unwrap(),
            "COPY public.staging_immigration\n\
             FROM 's3://bucket/sas_data'\n\
             IAM_ROLE 'arn:aws:iam::123456789012:role/dwhRole'\n\
             FORMAT AS PARQUET\n\
             COMPUPDATE OFF"
        );
    }

    #[test]
    fn test_csv_copy_with_keys() {
        let req = CopyRequest {
            table: "public.staging_demographics".into(),
            location: "s3://bucket/demographics/us-cities-demographics.csv".into(),
            format: FileFormat::Csv {
                delimiter: ';',
                ignore_header: 1,
            },
            credentials: CopyCredentials::AccessKeys(AccessKeys {
                access_key_id: "AKIA".into(),
                secret_access_key: "se'cret".into(),
                session_token: Some("tok".into()),
            }),
        };
        let sql = req.to_redshift_sql().unwrap();
        assert!(sql.contains(
            "ACCESS_KEY_ID 'AKIA' SECRET_ACCESS_KEY 'se''cret' SESSION_TOKEN 'tok'"
        ));
        assert!(sql.contains("\nCSV\nIGNOREHEADER 1\nDELIMITER ';'\n"));
    }

    #[test]
    fn test_ambient_rejected_for_redshift() {
        let req = CopyRequest {
            table: "public.t".into(),
            location: "s3://b/k".into(),
            format: FileFormat::Parquet,
            credentials: CopyCredentials::Ambient,
        };
        assert!(matches!(
            req.to_redshift_sql(),
            Err(EtlError::MissingCredentials { .. })
        ));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let keys = AccessKeys {
            access_key_id: "AKIA".into(),
            secret_access_key: "supersecret".into(),
            session_token: Some("token".into()),
        };
        let dbg = format!("{:?}", keys);
        assert!(!dbg.contains("supersecret"));
        assert!(!dbg.contains("\"token\""));
    }

    #[test]
    fn test_format_from_yaml() {
        let f: FileFormat = serde_yaml::from_str("format: csv\ndelimiter: ';'").unwrap();
        assert_eq!(
            f,
            FileFormat::Csv {
                delimiter: ';',
                ignore_header: 1
            }
        );
        let f: FileFormat = serde_yaml::from_str("format: parquet").unwrap();
        assert_eq!(f, FileFormat::Parquet);
    }
}
