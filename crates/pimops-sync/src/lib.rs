//! Import reconciliation engine: planner, group resolver, executor.
//!
//! A run moves through fixed stages: plan the diff, resolve every group,
//! validate the creation batch, create attributes, assemble the result.
//! Nothing is ever deleted remotely; remote-only attributes are reported as
//! preserved. A failed run is re-invoked from scratch; group resolution is
//! idempotent and 409 conflicts count as success, so re-runs converge.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use pimops_core::{
    find_attribute_match, map_attribute, map_group, match_attributes,
    prepare_attributes_for_creation, AttributeRecord, CreatedAttribute, CreatedGroup, FuzzyMatch,
    GroupCreateRequest, GroupRecord, ImportPlan, ImportResult, PreservedAttribute,
};
use pimops_gateway::{GatewayError, PimGateway};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pimops-sync";

/// The unique groups a snapshot references, first-seen-wins per group number.
pub fn extract_unique_groups(records: &[AttributeRecord]) -> Vec<GroupCreateRequest> {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    for record in records {
        if seen.insert(record.group_number.clone()) {
            groups.push(map_group(
                &record.group_name,
                &record.group_number,
                Some(record.group_order),
            ));
        }
    }
    groups
}

/// Pure diff between a snapshot and current remote state.
///
/// `existing_groups` is whatever the caller could fetch; planning with an
/// empty listing is safe because group resolution is idempotent at execution
/// time.
pub fn build_plan(
    exported: &[AttributeRecord],
    existing: &[AttributeRecord],
    existing_groups: &[GroupRecord],
    keep_existing_only: bool,
) -> ImportPlan {
    let unique_groups = extract_unique_groups(exported);

    let existing_numbers: HashSet<&str> = existing_groups.iter().map(|g| g.number.as_str()).collect();
    let existing_names: HashSet<String> = existing_groups
        .iter()
        .map(|g| g.name.to_lowercase())
        .collect();

    let groups_to_create: Vec<GroupCreateRequest> = unique_groups
        .into_iter()
        .filter(|g| {
            !existing_numbers.contains(g.number.as_str())
                && !existing_names.contains(&g.name.to_lowercase())
        })
        .collect();

    let (attributes_to_keep_matched, attributes_to_preserve): (Vec<_>, Vec<_>) = existing
        .iter()
        .cloned()
        .partition(|e| exported.iter().any(|x| match_attributes(x, e).is_some()));

    let mut attributes_to_create = Vec::new();
    let mut fuzzy_matches = Vec::new();
    let mut warnings = Vec::new();

    for record in exported {
        match find_attribute_match(record, existing) {
            Some((matched, kind)) if kind.is_fuzzy() => {
                warn!(
                    exported_number = %record.number,
                    existing_number = %matched.number,
                    matched_by = ?kind,
                    "fuzzy attribute match; review before trusting the diff"
                );
                fuzzy_matches.push(FuzzyMatch {
                    exported_number: record.number.clone(),
                    exported_name: record.name.clone(),
                    existing_number: matched.number.clone(),
                    existing_name: matched.name.clone(),
                    matched_by: kind,
                });
            }
            Some(_) => {}
            None => {
                let (request, mut map_warnings) = map_attribute(record, None);
                warnings.append(&mut map_warnings);
                attributes_to_create.push(request);
            }
        }
    }

    ImportPlan {
        groups_to_create,
        attributes_to_keep: if keep_existing_only {
            attributes_to_keep_matched
        } else {
            existing.to_vec()
        },
        attributes_to_preserve,
        attributes_to_create,
        fuzzy_matches,
        warnings,
    }
}

pub struct Planner<'a, G: PimGateway + ?Sized> {
    gateway: &'a G,
}

impl<'a, G: PimGateway + ?Sized> Planner<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Diff the snapshot against remote state. The group listing is
    /// best-effort: a fetch failure plans every referenced group for
    /// creation and leans on resolver idempotence.
    pub async fn plan(
        &self,
        exported: &[AttributeRecord],
        existing: &[AttributeRecord],
        keep_existing_only: bool,
    ) -> ImportPlan {
        let existing_groups = match self.gateway.list_groups().await {
            Ok(groups) => groups,
            Err(err) => {
                warn!(error = %err, "group listing failed; planning against an empty set");
                Vec::new()
            }
        };
        build_plan(exported, existing, &existing_groups, keep_existing_only)
    }
}

pub struct GroupResolver<'a, G: PimGateway + ?Sized> {
    gateway: &'a G,
}

impl<'a, G: PimGateway + ?Sized> GroupResolver<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Find or create a group, converging on one id per (name, number).
    ///
    /// A 409 on creation is recovered, not raised: the conflict payload's
    /// entity id wins, with a re-list matched by name-or-number as the
    /// fallback when the payload gave nothing.
    pub async fn ensure_group_exists(
        &self,
        desired: &GroupCreateRequest,
    ) -> Result<String, GatewayError> {
        let existing = self.gateway.list_groups().await?;
        if let Some(found) = existing.iter().find(|g| g.number == desired.number) {
            info!(group = %desired.name, id = %found.id, "group already exists");
            return Ok(found.id.clone());
        }

        info!(group = %desired.name, "creating group");
        match self.gateway.create_group(desired).await {
            Ok(outcome) => Ok(outcome.resource_id),
            Err(GatewayError::Conflict { entity_id }) => {
                if let Some(id) = entity_id {
                    info!(group = %desired.name, id = %id, "group created concurrently; using conflict id");
                    return Ok(id);
                }
                let groups = self.gateway.list_groups().await?;
                groups
                    .iter()
                    .find(|g| g.name == desired.name || g.number == desired.number)
                    .map(|g| g.id.clone())
                    .ok_or(GatewayError::Conflict { entity_id: None })
            }
            Err(err) => Err(err),
        }
    }
}

pub struct ImportExecutor<'a, G: PimGateway + ?Sized> {
    gateway: &'a G,
}

impl<'a, G: PimGateway + ?Sized> ImportExecutor<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Execute a plan: groups first, then attributes. The plan is never
    /// mutated; the result owns the resolved group mapping.
    ///
    /// Validation failure aborts the whole creation phase before any create
    /// call. After that, the first hard creation failure stops the loop;
    /// already-created attributes stay recorded. 409s count as created.
    pub async fn execute(&self, plan: &ImportPlan, exported: &[AttributeRecord]) -> ImportResult {
        let mut result = ImportResult {
            warnings: plan
                .warnings
                .iter()
                .map(|w| format!("{}: {}", w.attribute_number, w.message))
                .collect(),
            ..Default::default()
        };

        // Reporting only: no delete call exists anywhere in this pipeline.
        for attr in &plan.attributes_to_preserve {
            result.preserved_attributes.push(PreservedAttribute {
                attribute_number: attr.number.clone(),
                attribute_id: attr.id.clone(),
            });
        }

        // Phase 1: every group must resolve before any attribute creation,
        // recomputed from the snapshot rather than reused from the plan.
        let resolver = GroupResolver::new(self.gateway);
        let unique_groups = extract_unique_groups(exported);
        info!(count = unique_groups.len(), "resolving groups");
        for group in &unique_groups {
            match resolver.ensure_group_exists(group).await {
                Ok(group_id) => {
                    result
                        .group_mapping
                        .insert(group.number.clone(), group_id.clone());
                    result.created_groups.push(CreatedGroup {
                        group_number: group.number.clone(),
                        group_id,
                    });
                }
                Err(err) => {
                    result
                        .errors
                        .push(format!("group {} failed to resolve: {err}", group.number));
                    result.success = false;
                    return result;
                }
            }
        }

        // Phase 2: validate the whole batch, then create sequentially.
        if !plan.attributes_to_create.is_empty() {
            // Records with no number match their planned request by name so
            // they still reach validation and trip the fail-closed gate.
            let backing: Vec<AttributeRecord> = exported
                .iter()
                .filter(|e| {
                    plan.attributes_to_create
                        .iter()
                        .any(|c| match c.number.as_deref() {
                            Some(number) => e.number == number,
                            None => c.name == e.name,
                        })
                })
                .cloned()
                .collect();

            let prepared = prepare_attributes_for_creation(&backing);
            if !prepared.invalid.is_empty() {
                let mut message = format!("{} invalid attributes", prepared.invalid.len());
                for invalid in &prepared.invalid {
                    message.push_str(&format!(
                        "; {}: {}",
                        invalid.record.name,
                        invalid.errors.join(", ")
                    ));
                }
                result.errors.push(message);
                result.success = false;
                return result;
            }

            info!(count = prepared.valid.len(), "creating attributes");
            for item in prepared.valid {
                let mut request = item.request;
                if let Some(group_id) = result.group_mapping.get(&item.record.group_number) {
                    request.group_id = Some(group_id.clone());
                }
                let number = request.number.clone().unwrap_or_default();

                match self.gateway.create_attribute(&request).await {
                    Ok(outcome) => {
                        result.created_attributes.push(CreatedAttribute {
                            attribute_number: number,
                            attribute_id: outcome.resource_id,
                        });
                    }
                    Err(GatewayError::Conflict { entity_id }) => {
                        // Already present remotely: an idempotent success.
                        result.created_attributes.push(CreatedAttribute {
                            attribute_number: number,
                            attribute_id: entity_id.unwrap_or_else(|| "unknown".to_string()),
                        });
                    }
                    Err(err) => {
                        result
                            .errors
                            .push(format!("failed to create {}: {err}", item.record.name));
                        break;
                    }
                }
            }
        }

        result.success = result.errors.is_empty();
        result
    }
}

/// One full run: plan, execute, stamp.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: ImportResult,
}

pub async fn run_complete_import<G: PimGateway + ?Sized>(
    gateway: &G,
    exported: &[AttributeRecord],
    existing: &[AttributeRecord],
    keep_existing_only: bool,
) -> ImportRunSummary {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let plan = Planner::new(gateway)
        .plan(exported, existing, keep_existing_only)
        .await;
    let result = ImportExecutor::new(gateway).execute(&plan, exported).await;
    ImportRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        result,
    }
}
