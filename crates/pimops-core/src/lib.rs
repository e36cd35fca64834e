//! Core domain model for the PIM attribute import pipeline.
//!
//! Wire-shaped records, the snapshot-to-creation-request mapper, advisory
//! validation, and the number-or-name identity matching rule. Everything in
//! this crate is pure; I/O lives in `pimops-gateway` and `pimops-snapshot`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "pimops-core";

/// Data types the creation endpoint accepts without translation.
pub const KNOWN_DATA_TYPES: &[&str] = &[
    "text",
    "multiline",
    "single_select",
    "multi_select",
    "boolean",
    "integer",
    "decimal",
];

pub const FALLBACK_DATA_TYPE: &str = "text";

/// One selectable option on a select-type attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    #[serde(default)]
    pub value_id: String,
    #[serde(default)]
    pub number: String,
    pub value: String,
}

/// An attribute definition as the remote lists it and the snapshot stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub sorting_order: i64,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub group_number: String,
    #[serde(default)]
    pub group_order: i64,
    #[serde(default)]
    pub values: Vec<AttributeValue>,
    #[serde(default)]
    pub is_compound: bool,
    #[serde(default)]
    pub context_aware: bool,
}

/// An attribute group as the remote's group listing reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorting_order: Option<i64>,
}

/// Creation payload for the attribute-groups endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupCreateRequest {
    pub name: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorting_order: Option<i64>,
}

/// Enum restriction block attached to select-type creation requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Restrictions {
    #[serde(rename = "enum")]
    pub enumeration: EnumRestriction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnumRestriction {
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnumValue {
    pub value: String,
}

/// Creation payload for the attribute definitions endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttributeCreateRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_aware: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Restrictions>,
}

/// Warning produced while mapping a snapshot record into a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapWarning {
    pub attribute_number: String,
    pub message: String,
}

impl MapWarning {
    fn lossy_data_type(number: &str, from: &str) -> Self {
        Self {
            attribute_number: number.to_string(),
            message: format!("unknown data type {from:?} mapped to {FALLBACK_DATA_TYPE:?}"),
        }
    }
}

/// Map a snapshot data type onto one the creation endpoint accepts.
///
/// Total: unrecognized inputs fall back to `text` and report `true` in the
/// second position so callers can surface the loss.
pub fn map_data_type(data_type: &str) -> (String, bool) {
    if KNOWN_DATA_TYPES.contains(&data_type) {
        (data_type.to_string(), false)
    } else {
        (FALLBACK_DATA_TYPE.to_string(), true)
    }
}

fn is_select_type(data_type: &str) -> bool {
    matches!(data_type, "single_select" | "multi_select")
}

/// Build an attribute creation request from a snapshot record.
///
/// Select types with values keep their data type string verbatim and carry an
/// enum restriction built from the option labels; option value ids are
/// dropped and recreated server-side.
pub fn map_attribute(
    record: &AttributeRecord,
    group_id: Option<&str>,
) -> (AttributeCreateRequest, Vec<MapWarning>) {
    let mut warnings = Vec::new();
    let (data_type, lossy) = map_data_type(&record.data_type);
    if lossy {
        warnings.push(MapWarning::lossy_data_type(&record.number, &record.data_type));
    }

    let mut request = AttributeCreateRequest {
        name: record.name.clone(),
        data_type,
        ..Default::default()
    };

    if !record.number.is_empty() {
        request.number = Some(record.number.clone());
    }
    if let Some(description) = &record.description {
        if !description.is_empty() {
            request.description = Some(description.clone());
        }
    }
    request.context_aware = Some(record.context_aware);
    if let Some(group_id) = group_id {
        request.group_id = Some(group_id.to_string());
    }

    if is_select_type(&record.data_type) && !record.values.is_empty() {
        request.data_type = record.data_type.clone();
        request.restrictions = Some(Restrictions {
            enumeration: EnumRestriction {
                values: record
                    .values
                    .iter()
                    .map(|v| EnumValue { value: v.value.clone() })
                    .collect(),
            },
        });
    }

    (request, warnings)
}

/// Build a group creation request from the group fields of a snapshot record.
pub fn map_group(group_name: &str, group_number: &str, group_order: Option<i64>) -> GroupCreateRequest {
    GroupCreateRequest {
        name: group_name.to_string(),
        number: group_number.to_string(),
        sorting_order: group_order,
    }
}

/// Outcome of validating one creation request. Advisory: callers decide
/// whether failures abort anything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn is_valid_number_format(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_attribute(request: &AttributeCreateRequest) -> ValidationReport {
    let mut errors = Vec::new();
    let number = request.number.as_deref().unwrap_or_default();

    if request.name.trim().is_empty() {
        errors.push("Name required".to_string());
    }
    if number.trim().is_empty() {
        errors.push("Number required".to_string());
    }
    if request.data_type.trim().is_empty() {
        errors.push("DataType required".to_string());
    }
    if request.name.chars().count() > 255 {
        errors.push("Name too long".to_string());
    }
    if !number.is_empty() && !is_valid_number_format(number) {
        errors.push("Invalid number format".to_string());
    }

    ValidationReport { errors }
}

pub fn validate_group(request: &GroupCreateRequest) -> ValidationReport {
    let mut errors = Vec::new();

    if request.name.trim().is_empty() {
        errors.push("Name required".to_string());
    }
    if request.number.trim().is_empty() {
        errors.push("Number required".to_string());
    }
    if request.name.chars().count() > 255 {
        errors.push("Name too long".to_string());
    }
    if !request.number.is_empty() && !is_valid_number_format(&request.number) {
        errors.push("Invalid number format".to_string());
    }

    ValidationReport { errors }
}

#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    pub total_errors: usize,
    pub reports: Vec<ValidationReport>,
}

impl BatchValidation {
    pub fn is_valid(&self) -> bool {
        self.total_errors == 0
    }
}

pub fn validate_attribute_batch(requests: &[AttributeCreateRequest]) -> BatchValidation {
    let reports: Vec<ValidationReport> = requests.iter().map(validate_attribute).collect();
    let total_errors = reports.iter().map(|r| r.errors.len()).sum();
    BatchValidation { total_errors, reports }
}

/// A snapshot record paired with its mapped creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAttribute {
    pub record: AttributeRecord,
    pub request: AttributeCreateRequest,
}

/// A record that failed validation, with the offending request and errors.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidAttribute {
    pub record: AttributeRecord,
    pub request: AttributeCreateRequest,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PreparedAttributes {
    pub valid: Vec<PreparedAttribute>,
    pub invalid: Vec<InvalidAttribute>,
    pub warnings: Vec<MapWarning>,
}

/// Map and validate a batch of records ahead of creation.
pub fn prepare_attributes_for_creation(records: &[AttributeRecord]) -> PreparedAttributes {
    let mut prepared = PreparedAttributes::default();

    for record in records {
        let (request, mut warnings) = map_attribute(record, None);
        prepared.warnings.append(&mut warnings);
        let report = validate_attribute(&request);
        if report.is_valid() {
            prepared.valid.push(PreparedAttribute {
                record: record.clone(),
                request,
            });
        } else {
            prepared.invalid.push(InvalidAttribute {
                record: record.clone(),
                request,
                errors: report.errors,
            });
        }
    }

    prepared
}

/// How two attribute records were judged to be the same.
///
/// Criteria are checked in order, number before name; a record matching under
/// exactly one criterion is a fuzzy match the operator should review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeMatch {
    Exact,
    NumberOnly,
    NameOnly,
}

impl AttributeMatch {
    pub fn is_fuzzy(self) -> bool {
        !matches!(self, AttributeMatch::Exact)
    }
}

/// Identity rule: number match OR case-insensitive name match.
pub fn match_attributes(exported: &AttributeRecord, existing: &AttributeRecord) -> Option<AttributeMatch> {
    let number_match = !exported.number.is_empty() && exported.number == existing.number;
    let name_match = exported.name.eq_ignore_ascii_case(&existing.name);

    match (number_match, name_match) {
        (true, true) => Some(AttributeMatch::Exact),
        (true, false) => Some(AttributeMatch::NumberOnly),
        (false, true) => Some(AttributeMatch::NameOnly),
        (false, false) => None,
    }
}

/// Find the record an exported attribute resolves to, first-match-wins over
/// the ordered criteria: any number match beats any name match, regardless
/// of listing order.
pub fn find_attribute_match<'e>(
    exported: &AttributeRecord,
    existing: &'e [AttributeRecord],
) -> Option<(&'e AttributeRecord, AttributeMatch)> {
    if !exported.number.is_empty() {
        if let Some(by_number) = existing.iter().find(|e| e.number == exported.number) {
            return match_attributes(exported, by_number).map(|m| (by_number, m));
        }
    }
    existing
        .iter()
        .find(|e| exported.name.eq_ignore_ascii_case(&e.name))
        .map(|by_name| (by_name, AttributeMatch::NameOnly))
}

/// A pair matched under only one of the two identity criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyMatch {
    pub exported_number: String,
    pub exported_name: String,
    pub existing_number: String,
    pub existing_name: String,
    pub matched_by: AttributeMatch,
}

/// The diff between an exported snapshot and current remote state.
///
/// Immutable once built; the executor records its group resolution into the
/// result, never back into the plan. Nothing here ever proposes a deletion:
/// `attributes_to_preserve` are remote-only records that are reported and
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub groups_to_create: Vec<GroupCreateRequest>,
    pub attributes_to_keep: Vec<AttributeRecord>,
    pub attributes_to_preserve: Vec<AttributeRecord>,
    pub attributes_to_create: Vec<AttributeCreateRequest>,
    pub fuzzy_matches: Vec<FuzzyMatch>,
    pub warnings: Vec<MapWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGroup {
    pub group_number: String,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAttribute {
    pub attribute_number: String,
    pub attribute_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreservedAttribute {
    pub attribute_number: String,
    pub attribute_id: String,
}

/// Reserved for group re-assignment reporting; currently always empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub group_id: String,
    pub attribute_ids: Vec<String>,
}

/// Outcome of executing an [`ImportPlan`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub created_groups: Vec<CreatedGroup>,
    pub created_attributes: Vec<CreatedAttribute>,
    pub preserved_attributes: Vec<PreservedAttribute>,
    pub assignment_results: Vec<AssignmentResult>,
    pub group_mapping: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: &str, name: &str, data_type: &str) -> AttributeRecord {
        AttributeRecord {
            number: number.to_string(),
            name: name.to_string(),
            data_type: data_type.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn data_type_mapping_is_total() {
        for known in KNOWN_DATA_TYPES.iter().copied() {
            let (mapped, lossy) = map_data_type(known);
            assert_eq!(mapped, known);
            assert!(!lossy);
        }
        for unknown in ["dictionary", "matrix", "", "TEXT"] {
            let (mapped, lossy) = map_data_type(unknown);
            assert_eq!(mapped, FALLBACK_DATA_TYPE);
            assert!(lossy, "{unknown:?} should be flagged lossy");
        }
    }

    #[test]
    fn lossy_mapping_surfaces_a_warning() {
        let rec = record("A1", "Material", "formatted_text");
        let (request, warnings) = map_attribute(&rec, None);
        assert_eq!(request.data_type, "text");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].attribute_number, "A1");
        assert!(warnings[0].message.contains("formatted_text"));
    }

    #[test]
    fn select_type_keeps_data_type_and_builds_enum_restriction() {
        let mut rec = record("A2", "Color", "single_select");
        rec.values = vec![
            AttributeValue {
                value_id: "v-1".into(),
                number: "red".into(),
                value: "Red".into(),
            },
            AttributeValue {
                value_id: "v-2".into(),
                number: "blue".into(),
                value: "Blue".into(),
            },
        ];
        let (request, warnings) = map_attribute(&rec, Some("g-9"));
        assert!(warnings.is_empty());
        assert_eq!(request.data_type, "single_select");
        assert_eq!(request.group_id.as_deref(), Some("g-9"));
        let restriction = request.restrictions.expect("enum restriction");
        let values: Vec<&str> = restriction
            .enumeration
            .values
            .iter()
            .map(|v| v.value.as_str())
            .collect();
        assert_eq!(values, ["Red", "Blue"]);
    }

    #[test]
    fn select_type_without_values_gets_no_restriction() {
        let rec = record("A3", "Size", "multi_select");
        let (request, _) = map_attribute(&rec, None);
        assert!(request.restrictions.is_none());
        assert_eq!(request.data_type, "multi_select");
    }

    #[test]
    fn create_request_serializes_camel_case_and_skips_absent_fields() {
        let rec = record("A4", "Weight", "decimal");
        let (request, _) = map_attribute(&rec, None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["dataType"], "decimal");
        assert_eq!(json["number"], "A4");
        assert!(json.get("groupId").is_none());
        assert!(json.get("restrictions").is_none());
        assert!(json.get("description").is_none());
    }

    #[test]
    fn validation_rejects_space_in_number() {
        let request = AttributeCreateRequest {
            name: "Color".into(),
            number: Some("A 1".into()),
            data_type: "text".into(),
            ..Default::default()
        };
        let report = validate_attribute(&request);
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("Invalid number format")));
    }

    #[test]
    fn validation_rejects_blank_fields_and_long_names() {
        let request = AttributeCreateRequest {
            name: "x".repeat(256),
            number: Some("   ".into()),
            data_type: String::new(),
            ..Default::default()
        };
        let report = validate_attribute(&request);
        assert_eq!(
            report.errors,
            [
                "Number required",
                "DataType required",
                "Name too long",
                "Invalid number format"
            ]
        );
    }

    #[test]
    fn group_validation_mirrors_attribute_checks() {
        let ok = map_group("Dimensions", "dim-1", Some(3));
        assert!(validate_group(&ok).is_valid());

        let bad = GroupCreateRequest {
            name: "  ".into(),
            number: "g/1".into(),
            sorting_order: None,
        };
        let report = validate_group(&bad);
        assert_eq!(report.errors, ["Name required", "Invalid number format"]);
    }

    #[test]
    fn batch_validation_counts_every_error() {
        let good = AttributeCreateRequest {
            name: "Color".into(),
            number: Some("A1".into()),
            data_type: "text".into(),
            ..Default::default()
        };
        let bad = AttributeCreateRequest {
            name: String::new(),
            number: Some("A 2".into()),
            data_type: "text".into(),
            ..Default::default()
        };
        let batch = validate_attribute_batch(&[good, bad]);
        assert!(!batch.is_valid());
        assert_eq!(batch.total_errors, 2);
        assert!(batch.reports[0].is_valid());
    }

    #[test]
    fn prepare_partitions_valid_and_invalid() {
        let prepared = prepare_attributes_for_creation(&[
            record("A1", "Color", "text"),
            record("A 2", "Size", "text"),
        ]);
        assert_eq!(prepared.valid.len(), 1);
        assert_eq!(prepared.invalid.len(), 1);
        assert_eq!(prepared.valid[0].record.number, "A1");
        assert!(prepared.invalid[0]
            .errors
            .iter()
            .any(|e| e.contains("Invalid number format")));
    }

    #[test]
    fn matching_prefers_number_and_flags_fuzzy_pairs() {
        let exported = record("A1", "Color", "text");
        let same_number_same_name = record("A1", "color", "text");
        let same_number_other_name = record("A1", "Colour", "text");
        let other_number_same_name = record("B7", "COLOR", "text");
        let unrelated = record("B7", "Size", "text");

        assert_eq!(
            match_attributes(&exported, &same_number_same_name),
            Some(AttributeMatch::Exact)
        );
        assert_eq!(
            match_attributes(&exported, &same_number_other_name),
            Some(AttributeMatch::NumberOnly)
        );
        assert_eq!(
            match_attributes(&exported, &other_number_same_name),
            Some(AttributeMatch::NameOnly)
        );
        assert_eq!(match_attributes(&exported, &unrelated), None);
        assert!(AttributeMatch::NumberOnly.is_fuzzy());
        assert!(!AttributeMatch::Exact.is_fuzzy());
    }

    #[test]
    fn find_match_prefers_number_over_listing_order() {
        let exported = record("A1", "Color", "text");
        let existing = vec![
            record("B2", "color", "text"),
            record("A1", "Shade", "text"),
        ];
        let (matched, kind) = find_attribute_match(&exported, &existing).unwrap();
        assert_eq!(matched.number, "A1");
        assert_eq!(kind, AttributeMatch::NumberOnly);
    }

    #[test]
    fn find_match_falls_back_to_name() {
        let exported = record("A1", "Color", "text");
        let existing = vec![record("B2", "COLOR", "text")];
        let (matched, kind) = find_attribute_match(&exported, &existing).unwrap();
        assert_eq!(matched.number, "B2");
        assert_eq!(kind, AttributeMatch::NameOnly);
        assert!(find_attribute_match(&exported, &[record("B2", "Size", "text")]).is_none());
    }

    #[test]
    fn empty_numbers_never_match_each_other() {
        let exported = record("", "Color", "text");
        let existing = record("", "Size", "text");
        assert_eq!(match_attributes(&exported, &existing), None);
    }

    #[test]
    fn attribute_record_deserializes_remote_listing_shape() {
        let json = r#"{
            "order": 1,
            "groupOrder": 2,
            "groupId": "g-1",
            "groupName": "General",
            "groupNumber": "gen",
            "sortingOrder": 5,
            "id": "a-1",
            "name": "Color",
            "number": "A1",
            "dataType": "single_select",
            "values": [{"valueId": "v-1", "number": "red", "value": "Red"}],
            "isCompound": false,
            "contextAware": true
        }"#;
        let rec: AttributeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.group_number, "gen");
        assert_eq!(rec.values[0].value, "Red");
        assert!(rec.context_aware);
    }
}
