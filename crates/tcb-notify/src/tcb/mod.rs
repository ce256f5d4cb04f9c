// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Model of the PCS TDX TCB bundle and the level-matching logic.
//!
//! Bundles arrive as `{"tcbInfo": {...}, "signature": "..."}`. The decoder is
//! typed for the fields the pipeline reads; everything else is preserved in
//! the `extra` maps so the verbatim shape survives re-serialization.

use crate::model::{TcbComponents, TcbStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Full response of `GET /tdx/certification/v4/tcb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbInfoResponse {
    /// The signed TCB info body.
    #[serde(rename = "tcbInfo")]
    pub tcb_info: TcbInfo,
    /// Signature over the body; kept only for the audit copy.
    #[serde(default)]
    pub signature: String,
}

/// The TCB info body of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbInfo {
    /// Bundle family identifier ("TDX").
    #[serde(default)]
    pub id: String,
    /// TCB info structure version.
    #[serde(default)]
    pub version: u32,
    /// Issue date of the bundle.
    pub issue_date: DateTime<Utc>,
    /// Scheduled next update.
    pub next_update: DateTime<Utc>,
    /// FMSPC the bundle applies to.
    #[serde(default)]
    pub fmspc: String,
    /// PCE identifier.
    #[serde(default)]
    pub pce_id: String,
    /// TCB type.
    #[serde(default)]
    pub tcb_type: u32,
    /// Monotonically increasing bundle identifier.
    pub tcb_evaluation_data_number: u32,
    /// Ordered levels, highest security first.
    #[serde(default)]
    pub tcb_levels: Vec<TcbLevel>,
    /// Fields this pipeline does not interpret, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One TCB level of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbLevel {
    /// Required component SVNs for this level.
    pub tcb: RequiredTcb,
    /// Date tag of the level.
    #[serde(rename = "tcbDate", default)]
    pub tcb_date: String,
    /// Status assigned to platforms at or above this level.
    #[serde(rename = "tcbStatus")]
    pub tcb_status: TcbStatus,
    /// Security advisories applying at this level.
    #[serde(rename = "advisoryIDs", default)]
    pub advisory_ids: Vec<String>,
    /// Unknown fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The required SVN vectors of a TCB level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiredTcb {
    /// Required SGX component SVNs, 16 entries.
    #[serde(default)]
    pub sgxtcbcomponents: Vec<ComponentSvn>,
    /// Required TDX component SVNs, 16 entries.
    #[serde(default)]
    pub tdxtcbcomponents: Vec<ComponentSvn>,
    /// Required PCE SVN.
    #[serde(default)]
    pub pcesvn: u16,
}

/// A single component SVN requirement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSvn {
    /// Required security version number.
    pub svn: u8,
    /// Component category, when the PCS names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Component type, when the PCS names one.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
}

impl TcbLevel {
    /// A quote meets a level when every SGX and TDX component SVN and the PCE
    /// SVN are at or above the level's requirements.
    pub fn is_met_by(&self, components: &TcbComponents) -> bool {
        for (i, required) in self.tcb.sgxtcbcomponents.iter().take(16).enumerate() {
            if components.sgx_components[i] < required.svn {
                return false;
            }
        }
        for (i, required) in self.tcb.tdxtcbcomponents.iter().take(16).enumerate() {
            if components.tdx_components[i] < required.svn {
                return false;
            }
        }
        components.pce_svn >= self.tcb.pcesvn
    }
}

/// The highest level a quote meets; levels are ordered highest-security first.
pub fn match_level<'a>(
    levels: &'a [TcbLevel],
    components: &TcbComponents,
) -> Option<&'a TcbLevel> {
    levels.iter().find(|level| level.is_met_by(components))
}

/// Count of component requirement changes between two bundles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TcbDelta {
    /// Components whose required SVN differs.
    pub changes: u32,
    /// Components whose required SVN decreased.
    pub downgrades: u32,
}

/// Compare the top (highest security) level of two bundles component by
/// component: 16 SGX, 16 TDX and the PCE SVN.
pub fn component_delta(previous: &TcbInfo, next: &TcbInfo) -> TcbDelta {
    let (Some(prev), Some(next)) = (previous.tcb_levels.first(), next.tcb_levels.first()) else {
        return TcbDelta::default();
    };

    let mut delta = TcbDelta::default();
    let mut count = |old: u32, new: u32| {
        if old != new {
            delta.changes += 1;
            if new < old {
                delta.downgrades += 1;
            }
        }
    };

    for i in 0..16 {
        let svn = |tcb: &RequiredTcb| tcb.sgxtcbcomponents.get(i).map_or(0, |c| u32::from(c.svn));
        count(svn(&prev.tcb), svn(&next.tcb));
    }
    for i in 0..16 {
        let svn = |tcb: &RequiredTcb| tcb.tdxtcbcomponents.get(i).map_or(0, |c| u32::from(c.svn));
        count(svn(&prev.tcb), svn(&next.tcb));
    }
    count(u32::from(prev.tcb.pcesvn), u32::from(next.tcb.pcesvn));

    delta
}

/// Advisory severity tag carried in alert details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// More than 3 component downgrades.
    Critical,
    /// More than 10 component changes, or at least one downgrade.
    High,
    /// More than 5 component changes.
    Medium,
    /// Everything else.
    Low,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Severity of a bundle change given its component delta.
pub fn alert_severity(delta: &TcbDelta) -> Severity {
    if delta.downgrades > 3 {
        Severity::Critical
    } else if delta.changes > 10 || delta.downgrades >= 1 {
        Severity::High
    } else if delta.changes > 5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SAMPLE_BUNDLE: &str = r#"{
        "tcbInfo": {
            "id": "TDX",
            "version": 3,
            "issueDate": "2024-03-13T10:40:28Z",
            "nextUpdate": "2024-04-12T10:40:28Z",
            "fmspc": "30606a000000",
            "pceId": "0000",
            "tcbType": 0,
            "tcbEvaluationDataNumber": 16,
            "tdxModule": {"mrsigner": "0000", "attributes": "0000000000000000"},
            "tcbLevels": [
                {
                    "tcb": {
                        "sgxtcbcomponents": [
                            {"svn": 2, "category": "BIOS"}, {"svn": 2}, {"svn": 2}, {"svn": 2},
                            {"svn": 3}, {"svn": 1}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0}
                        ],
                        "pcesvn": 13,
                        "tdxtcbcomponents": [
                            {"svn": 5, "type": "TDX Module"}, {"svn": 0}, {"svn": 2}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0}
                        ]
                    },
                    "tcbDate": "2024-03-13T00:00:00Z",
                    "tcbStatus": "UpToDate"
                },
                {
                    "tcb": {
                        "sgxtcbcomponents": [
                            {"svn": 1}, {"svn": 1}, {"svn": 1}, {"svn": 1},
                            {"svn": 1}, {"svn": 1}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0}
                        ],
                        "pcesvn": 5,
                        "tdxtcbcomponents": [
                            {"svn": 1}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0},
                            {"svn": 0}, {"svn": 0}, {"svn": 0}, {"svn": 0}
                        ]
                    },
                    "tcbDate": "2023-08-09T00:00:00Z",
                    "tcbStatus": "OutOfDate",
                    "advisoryIDs": ["INTEL-SA-00837"]
                }
            ]
        },
        "signature": "deadbeef"
    }"#;

    fn components(sgx0: u8, tdx0: u8, pce: u16) -> TcbComponents {
        let mut c = TcbComponents {
            sgx_components: [9; 16],
            tdx_components: [9; 16],
            pce_svn: pce,
        };
        c.sgx_components[0] = sgx0;
        c.tdx_components[0] = tdx0;
        c
    }

    #[test]
    fn decodes_pcs_bundle_and_preserves_extras() {
        let response: TcbInfoResponse = serde_json::from_str(SAMPLE_BUNDLE).unwrap();
        let info = &response.tcb_info;
        assert_eq!(info.fmspc, "30606a000000");
        assert_eq!(info.tcb_evaluation_data_number, 16);
        assert_eq!(info.tcb_levels.len(), 2);
        assert_eq!(info.tcb_levels[0].tcb_status, TcbStatus::UpToDate);
        assert_eq!(info.tcb_levels[1].advisory_ids, vec!["INTEL-SA-00837"]);
        assert!(info.extra.contains_key("tdxModule"));

        let round = serde_json::to_value(info).unwrap();
        assert_eq!(round["tdxModule"]["mrsigner"], "0000");
    }

    #[test]
    fn highest_level_met_wins() {
        let response: TcbInfoResponse = serde_json::from_str(SAMPLE_BUNDLE).unwrap();
        let levels = &response.tcb_info.tcb_levels;

        let current = components(9, 9, 13);
        assert_eq!(
            match_level(levels, &current).unwrap().tcb_status,
            TcbStatus::UpToDate
        );

        // meets only the second level: SGX component 0 below the first level
        let behind = components(1, 9, 13);
        assert_eq!(
            match_level(levels, &behind).unwrap().tcb_status,
            TcbStatus::OutOfDate
        );

        // meets nothing
        let ancient = components(0, 0, 1);
        assert!(match_level(levels, &ancient).is_none());
    }

    #[test]
    fn pce_svn_gates_the_level() {
        let response: TcbInfoResponse = serde_json::from_str(SAMPLE_BUNDLE).unwrap();
        let levels = &response.tcb_info.tcb_levels;
        let low_pce = components(9, 9, 12);
        assert_eq!(
            match_level(levels, &low_pce).unwrap().tcb_status,
            TcbStatus::OutOfDate
        );
    }

    fn bundle_with_top_level(sgx: [u8; 16], pce: u16) -> TcbInfo {
        let mut response: TcbInfoResponse = serde_json::from_str(SAMPLE_BUNDLE).unwrap();
        let tcb = &mut response.tcb_info.tcb_levels[0].tcb;
        for (component, svn) in tcb.sgxtcbcomponents.iter_mut().zip(sgx) {
            component.svn = svn;
        }
        tcb.pcesvn = pce;
        response.tcb_info
    }

    #[test]
    fn delta_counts_changes_and_downgrades() {
        let old = bundle_with_top_level([2; 16], 13);
        let mut new_sgx = [2u8; 16];
        new_sgx[0] = 3;
        new_sgx[1] = 1;
        let new = bundle_with_top_level(new_sgx, 14);

        let delta = component_delta(&old, &new);
        assert_eq!(delta.changes, 3);
        assert_eq!(delta.downgrades, 1);
    }

    #[test]
    fn severity_thresholds() {
        let sev = |changes, downgrades| {
            alert_severity(&TcbDelta {
                changes,
                downgrades,
            })
        };
        assert_eq!(sev(0, 4), Severity::Critical);
        assert_eq!(sev(11, 0), Severity::High);
        assert_eq!(sev(2, 1), Severity::High);
        assert_eq!(sev(6, 0), Severity::Medium);
        assert_eq!(sev(5, 0), Severity::Low);
        assert_eq!(sev(0, 0), Severity::Low);
    }
}
