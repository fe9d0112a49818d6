//! Depreciation profile payloads for capital assets

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    StraightLine,
    ReducingBalance,
    NoDepreciation,
}

impl Method {
    pub const ALL: [Method; 3] = [
        Method::StraightLine,
        Method::ReducingBalance,
        Method::NoDepreciation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::StraightLine => "straight_line",
            Method::ReducingBalance => "reducing_balance",
            Method::NoDepreciation => "no_depreciation",
        }
    }

    /// Parameter this method requires, if any
    pub fn required_parameter(self) -> Option<&'static str> {
        match self {
            Method::StraightLine => Some("asset_life_years"),
            Method::ReducingBalance => Some("annual_depreciation_percentage"),
            Method::NoDepreciation => None,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown depreciation method: {}", s)))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Annually,
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(Frequency::Monthly),
            "annually" => Ok(Frequency::Annually),
            other => Err(Error::InvalidArgument(format!(
                "unknown frequency: {}",
                other
            ))),
        }
    }
}

/// Inputs for one depreciation profile
#[derive(Debug, Clone, Default)]
pub struct ProfileRequest {
    pub method: Option<Method>,
    pub frequency: Option<Frequency>,
    pub asset_life_years: Option<u32>,
    pub annual_depreciation_percentage: Option<u32>,
}

#[derive(Debug, Serialize)]
struct Profile {
    method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<Frequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    asset_life_years: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annual_depreciation_percentage: Option<u32>,
}

/// Rows describing each method, for `depreciation-profiles methods`
pub fn method_rows() -> Vec<Value> {
    Method::ALL
        .into_iter()
        .map(|m| {
            json!({
                "method": m.as_str(),
                "required_parameters": m.required_parameter().unwrap_or("-"),
                "optional_parameters": "frequency (monthly|annually)",
            })
        })
        .collect()
}

/// Validate `request` and wrap it as a capital asset payload.
pub fn build_profile(request: &ProfileRequest) -> Result<Value> {
    let method = request
        .method
        .ok_or_else(|| Error::InvalidArgument("--method is required".to_string()))?;

    let mut profile = Profile {
        method,
        frequency: request.frequency,
        asset_life_years: None,
        annual_depreciation_percentage: None,
    };

    match method {
        Method::StraightLine => {
            let years = request.asset_life_years.ok_or_else(|| {
                Error::InvalidArgument("--asset-life-years is required for straight_line".to_string())
            })?;
            if !(2..=25).contains(&years) {
                return Err(Error::InvalidArgument(
                    "asset life years must be between 2 and 25".to_string(),
                ));
            }
            profile.asset_life_years = Some(years);
        }
        Method::ReducingBalance => {
            let pct = request.annual_depreciation_percentage.ok_or_else(|| {
                Error::InvalidArgument(
                    "--annual-depreciation-percentage is required for reducing_balance".to_string(),
                )
            })?;
            if !(1..=99).contains(&pct) {
                return Err(Error::InvalidArgument(
                    "annual depreciation percentage must be between 1 and 99".to_string(),
                ));
            }
            profile.annual_depreciation_percentage = Some(pct);
        }
        Method::NoDepreciation => {
            if request.asset_life_years.is_some() {
                return Err(Error::InvalidArgument(
                    "--asset-life-years is not used for no_depreciation".to_string(),
                ));
            }
            if request.annual_depreciation_percentage.is_some() {
                return Err(Error::InvalidArgument(
                    "--annual-depreciation-percentage is not used for no_depreciation".to_string(),
                ));
            }
        }
    }

    Ok(json!({ "capital_asset": { "depreciation_profile": profile } }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method) -> ProfileRequest {
        ProfileRequest {
            method: Some(method),
            ..Default::default()
        }
    }

    #[test]
    fn test_straight_line_payload() {
        let mut req = request(Method::StraightLine);
        req.asset_life_years = Some(5);
        req.frequency = Some(Frequency::Annually);
        let payload = build_profile(&req).unwrap();
        assert_eq!(
            payload,
            json!({"capital_asset": {"depreciation_profile": {
                "method": "straight_line",
                "frequency": "annually",
                "asset_life_years": 5
            }}})
        );
    }

    #[test]
    fn test_straight_line_bounds() {
        let mut req = request(Method::StraightLine);
        assert!(build_profile(&req).is_err());
        req.asset_life_years = Some(1);
        assert!(build_profile(&req).is_err());
        req.asset_life_years = Some(26);
        assert!(build_profile(&req).is_err());
        req.asset_life_years = Some(25);
        assert!(build_profile(&req).is_ok());
    }

    #[test]
    fn test_reducing_balance_bounds() {
        let mut req = request(Method::ReducingBalance);
        req.annual_depreciation_percentage = Some(0);
        assert!(build_profile(&req).is_err());
        req.annual_depreciation_percentage = Some(99);
        let payload = build_profile(&req).unwrap();
        assert_eq!(
            payload["capital_asset"]["depreciation_profile"]["annual_depreciation_percentage"],
            json!(99)
        );
    }

    #[test]
    fn test_no_depreciation_rejects_parameters() {
        let mut req = request(Method::NoDepreciation);
        assert_eq!(
            build_profile(&req).unwrap(),
            json!({"capital_asset": {"depreciation_profile": {"method": "no_depreciation"}}})
        );
        req.asset_life_years = Some(3);
        let err = build_profile(&req).unwrap_err();
        assert!(err.to_string().contains("not used for no_depreciation"));
    }

    #[test]
    fn test_method_rows() {
        let rows = method_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["required_parameters"], json!("-"));
        assert_eq!("reducing_balance".parse::<Method>().unwrap(), Method::ReducingBalance);
    }
}
