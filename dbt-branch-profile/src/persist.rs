//! Persisted profile document
//!
//! ```json
//! {"branch-profile": {
//!   "application": "a.out",
//!   "branches":   [{"branch": {"address": "4096",
//!                    "targets": [{"target": {"address": "8192", "branchCount": "3"}}]}}],
//!   "procedures": [{"procedure": {"entry": "8192",
//!                    "callsites":   [{"call": {"from": "4096", "return": "4100"}}],
//!                    "returnsites": [{"return": {"at": "8220"}}]}}]}}
//! ```
//!
//! Every element is a single-key object whose key is the element tag, so a
//! wrong tag anywhere in the tree fails to deserialize. Numbers are decimal
//! strings.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use dbt_core::{DbtError, DbtResult, GuestAddr};
use log::info;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::history::BranchHistory;
use crate::procedure::ProcedureRecord;
use crate::site::BranchSite;

#[derive(Debug, Serialize, Deserialize)]
enum ProfileDocument {
    #[serde(rename = "branch-profile")]
    BranchProfile(ProfileBody),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    application: Option<String>,
    #[serde(default)]
    branches: Vec<BranchElement>,
    #[serde(default)]
    procedures: Vec<ProcedureElement>,
}

#[derive(Debug, Serialize, Deserialize)]
enum BranchElement {
    #[serde(rename = "branch")]
    Branch(BranchNode),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BranchNode {
    #[serde_as(as = "DisplayFromStr")]
    address: u64,
    #[serde(default)]
    targets: Vec<TargetElement>,
}

#[derive(Debug, Serialize, Deserialize)]
enum TargetElement {
    #[serde(rename = "target")]
    Target(TargetNode),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct TargetNode {
    #[serde_as(as = "DisplayFromStr")]
    address: u64,
    #[serde_as(as = "DisplayFromStr")]
    branch_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
enum ProcedureElement {
    #[serde(rename = "procedure")]
    Procedure(ProcedureNode),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcedureNode {
    #[serde_as(as = "DisplayFromStr")]
    entry: u64,
    #[serde(default)]
    callsites: Vec<CallElement>,
    #[serde(default)]
    returnsites: Vec<ReturnElement>,
}

#[derive(Debug, Serialize, Deserialize)]
enum CallElement {
    #[serde(rename = "call")]
    Call(CallNode),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CallNode {
    #[serde_as(as = "DisplayFromStr")]
    from: u64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(rename = "return")]
    return_to: u64,
}

#[derive(Debug, Serialize, Deserialize)]
enum ReturnElement {
    #[serde(rename = "return")]
    Return(ReturnNode),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReturnNode {
    #[serde_as(as = "DisplayFromStr")]
    at: u64,
}

impl BranchHistory {
    fn to_document(&self, application: Option<&str>) -> ProfileDocument {
        let branches = self
            .sites
            .read()
            .iter()
            .map(|(address, site)| {
                BranchElement::Branch(BranchNode {
                    address: address.value(),
                    targets: site
                        .target_counts()
                        .map(|(target, count)| {
                            TargetElement::Target(TargetNode {
                                address: target.value(),
                                branch_count: count,
                            })
                        })
                        .collect(),
                })
            })
            .collect();

        let procedures = self
            .procedures
            .read()
            .values()
            .map(|procedure| {
                ProcedureElement::Procedure(ProcedureNode {
                    entry: procedure.entry().value(),
                    callsites: procedure
                        .call_sites()
                        .iter()
                        .map(|c| {
                            CallElement::Call(CallNode {
                                from: c.from.value(),
                                return_to: c.return_to.value(),
                            })
                        })
                        .collect(),
                    returnsites: procedure
                        .return_sites()
                        .iter()
                        .map(|at| ReturnElement::Return(ReturnNode { at: at.value() }))
                        .collect(),
                })
            })
            .collect();

        ProfileDocument::BranchProfile(ProfileBody {
            application: application.map(str::to_owned),
            branches,
            procedures,
        })
    }

    /// Serialize the full profile as a JSON string
    pub fn to_json(&self, application: Option<&str>) -> DbtResult<String> {
        serde_json::to_string_pretty(&self.to_document(application))
            .map_err(|e| DbtError::profile_format(e.to_string()))
    }

    /// Replace the in-memory profile with the one in `json`.
    ///
    /// The current sites and procedures are cleared first, even if the
    /// document turns out to be malformed. Returns the recorded application
    /// name, if any.
    pub fn load_json(&self, json: &str) -> DbtResult<Option<String>> {
        self.load_slice(json.as_bytes())
    }

    fn load_slice(&self, bytes: &[u8]) -> DbtResult<Option<String>> {
        let mut sites = self.sites.write();
        let mut procedures = self.procedures.write();
        sites.clear();
        procedures.clear();

        let ProfileDocument::BranchProfile(body) =
            serde_json::from_slice(bytes).map_err(|e| DbtError::profile_format(e.to_string()))?;

        for BranchElement::Branch(branch) in body.branches {
            let targets: BTreeMap<GuestAddr, u64> = branch
                .targets
                .into_iter()
                .map(|TargetElement::Target(t)| (GuestAddr(t.address), t.branch_count))
                .collect();
            sites.insert(GuestAddr(branch.address), BranchSite::from_targets(targets));
        }

        for ProcedureElement::Procedure(node) in body.procedures {
            let entry = GuestAddr(node.entry);
            let record = procedures
                .entry(entry)
                .or_insert_with(|| ProcedureRecord::new(entry));
            for CallElement::Call(call) in node.callsites {
                record.register_call(GuestAddr(call.from), GuestAddr(call.return_to));
            }
            for ReturnElement::Return(ret) in node.returnsites {
                record.register_return(GuestAddr(ret.at));
            }
        }

        Ok(body.application)
    }

    /// Write the profile to `path`
    pub fn save(&self, path: impl AsRef<Path>, application: Option<&str>) -> DbtResult<()> {
        let path = path.as_ref();
        let document = self.to_document(application);
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &document).map_err(std::io::Error::from)?;
        writer.flush()?;
        info!(
            "saved branch profile ({} sites, {} procedures) to {}",
            self.site_count(),
            self.procedure_count(),
            path.display()
        );
        Ok(())
    }

    /// Replace the in-memory profile with the one stored at `path`
    pub fn load(&self, path: impl AsRef<Path>) -> DbtResult<Option<String>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let application = self.load_slice(&bytes)?;
        info!(
            "loaded branch profile ({} sites, {} procedures) from {}",
            self.site_count(),
            self.procedure_count(),
            path.display()
        );
        Ok(application)
    }
}
