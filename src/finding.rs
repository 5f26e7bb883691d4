use crate::cost_model::{VolumeSpec, VolumeType};
use crate::identity::recommendation_id;
use crate::record::{coerce_f64, scalar_text};
use crate::TrackerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub const ACTION_RIGHTSIZE: &str = "Rightsize";
pub const ACTION_STOPPED_INSTANCE: &str = "Stopped EC2 Instance";
pub const ACTION_UNATTACHED_VOLUME: &str = "Unattached EBS";

/// Hub resource types that are never tracked.
const UNTRACKED_HUB_RESOURCE_TYPES: [&str; 1] = ["RdsReservedInstances"];

/// Which pull produced a batch of findings. Also names its cached tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    /// Cost Optimization Hub recommendations.
    Chub,
    /// Stopped EC2 instances.
    Sec2,
    /// Unattached EBS volumes.
    Uebs,
}

impl FindingKind {
    pub const ALL: [FindingKind; 3] = [FindingKind::Chub, FindingKind::Sec2, FindingKind::Uebs];

    pub fn name(&self) -> &'static str {
        match self {
            FindingKind::Chub => "chub",
            FindingKind::Sec2 => "sec2",
            FindingKind::Uebs => "uebs",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FindingKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chub" | "hub" => Ok(FindingKind::Chub),
            "sec2" | "stopped-ec2" => Ok(FindingKind::Sec2),
            "uebs" | "unattached-ebs" => Ok(FindingKind::Uebs),
            _ => Err(TrackerError::InvalidArgument(format!("unknown finding kind {}", s))),
        }
    }
}

/// Resource tag. Accepts both `{Key, Value}` and `{key, value}` shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(alias = "Value", default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubRecommendation {
    pub recommendation_id: String,
    pub account: String,
    /// Absent for reservation and savings-plan purchases.
    pub resource_id: Option<String>,
    pub action_type: String,
    pub estimated_monthly_savings: f64,
    pub current_resource_type: String,
    pub current_resource_summary: String,
    pub recommended_resource_summary: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedVolume {
    pub volume_id: String,
    pub spec: VolumeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppedInstance {
    pub instance_id: String,
    pub account: String,
    pub instance_type: String,
    pub platform: Option<String>,
    pub volumes: Vec<AttachedVolume>,
    pub estimated_monthly_savings: f64,
    pub recommendation_id: String,
    pub tags: Vec<Tag>,
}

impl StoppedInstance {
    /// Price a stopped instance by the storage it keeps paying for.
    pub fn priced(
        instance_id: impl Into<String>,
        account: impl Into<String>,
        instance_type: impl Into<String>,
        platform: Option<String>,
        volumes: Vec<AttachedVolume>,
        tags: Vec<Tag>,
    ) -> Result<Self, TrackerError> {
        let instance_id = instance_id.into();
        let account = account.into();
        let mut savings = 0.0;
        for volume in &volumes {
            savings += volume.spec.monthly_cost()?;
        }
        let recommendation_id = recommendation_id(&account, &instance_id, savings);
        Ok(Self {
            instance_id,
            account,
            instance_type: instance_type.into(),
            platform,
            volumes,
            estimated_monthly_savings: savings,
            recommendation_id,
            tags,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnattachedVolume {
    pub volume_id: String,
    pub account: String,
    pub spec: VolumeSpec,
    pub estimated_monthly_savings: f64,
    pub recommendation_id: String,
    pub tags: Vec<Tag>,
}

impl UnattachedVolume {
    pub fn priced(
        volume_id: impl Into<String>,
        account: impl Into<String>,
        spec: VolumeSpec,
        tags: Vec<Tag>,
    ) -> Result<Self, TrackerError> {
        let volume_id = volume_id.into();
        let account = account.into();
        let savings = spec.monthly_cost()?;
        let recommendation_id = recommendation_id(&account, &volume_id, savings);
        Ok(Self {
            volume_id,
            account,
            spec,
            estimated_monthly_savings: savings,
            recommendation_id,
            tags,
        })
    }
}

/// A raw finding as pulled, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum RawFinding {
    Hub(HubRecommendation),
    StoppedInstance(StoppedInstance),
    UnattachedVolume(UnattachedVolume),
}

/// Before/after shape of a rightsizing recommendation.
#[derive(Debug, Clone, PartialEq)]
pub enum Rightsizing<'a> {
    Instance { from: &'a str, to: &'a str },
    Volume { from: &'a str, to: &'a str },
}

impl RawFinding {
    /// Extract a typed finding from one raw map of the given kind.
    pub fn from_json(kind: FindingKind, value: &Value) -> Result<Self, TrackerError> {
        let map = value
            .as_object()
            .ok_or_else(|| TrackerError::InvalidArgument(format!("{} finding is not an object", kind)))?;
        match kind {
            FindingKind::Chub => extract_hub(map).map(RawFinding::Hub),
            FindingKind::Sec2 => extract_stopped_instance(map).map(RawFinding::StoppedInstance),
            FindingKind::Uebs => extract_unattached_volume(map).map(RawFinding::UnattachedVolume),
        }
    }

    pub fn kind(&self) -> FindingKind {
        match self {
            RawFinding::Hub(_) => FindingKind::Chub,
            RawFinding::StoppedInstance(_) => FindingKind::Sec2,
            RawFinding::UnattachedVolume(_) => FindingKind::Uebs,
        }
    }

    /// Resource id, falling back to the recommendation id for hub findings
    /// with no resource (reservations, savings plans).
    pub fn resource_id(&self) -> &str {
        match self {
            RawFinding::Hub(h) => h.resource_id.as_deref().unwrap_or(&h.recommendation_id),
            RawFinding::StoppedInstance(s) => &s.instance_id,
            RawFinding::UnattachedVolume(v) => &v.volume_id,
        }
    }

    pub fn recommendation_id(&self) -> &str {
        match self {
            RawFinding::Hub(h) => &h.recommendation_id,
            RawFinding::StoppedInstance(s) => &s.recommendation_id,
            RawFinding::UnattachedVolume(v) => &v.recommendation_id,
        }
    }

    pub fn account(&self) -> &str {
        match self {
            RawFinding::Hub(h) => &h.account,
            RawFinding::StoppedInstance(s) => &s.account,
            RawFinding::UnattachedVolume(v) => &v.account,
        }
    }

    pub fn action_type(&self) -> &str {
        match self {
            RawFinding::Hub(h) => &h.action_type,
            RawFinding::StoppedInstance(_) => ACTION_STOPPED_INSTANCE,
            RawFinding::UnattachedVolume(_) => ACTION_UNATTACHED_VOLUME,
        }
    }

    pub fn estimated_monthly_savings(&self) -> f64 {
        match self {
            RawFinding::Hub(h) => h.estimated_monthly_savings,
            RawFinding::StoppedInstance(s) => s.estimated_monthly_savings,
            RawFinding::UnattachedVolume(v) => v.estimated_monthly_savings,
        }
    }

    pub fn tags(&self) -> &[Tag] {
        match self {
            RawFinding::Hub(h) => &h.tags,
            RawFinding::StoppedInstance(s) => &s.tags,
            RawFinding::UnattachedVolume(v) => &v.tags,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags()
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// False for findings that are pulled but deliberately not tracked.
    pub fn is_tracked(&self) -> bool {
        match self {
            RawFinding::Hub(h) => !UNTRACKED_HUB_RESOURCE_TYPES.contains(&h.current_resource_type.as_str()),
            _ => true,
        }
    }

    pub fn rightsizing(&self) -> Option<Rightsizing<'_>> {
        let RawFinding::Hub(h) = self else {
            return None;
        };
        if h.action_type != ACTION_RIGHTSIZE {
            return None;
        }
        let from = h.current_resource_summary.as_str();
        let to = h.recommended_resource_summary.as_str();
        match h.current_resource_type.as_str() {
            "Ec2Instance" => Some(Rightsizing::Instance { from, to }),
            "EbsVolume" => Some(Rightsizing::Volume { from, to }),
            _ => None,
        }
    }
}

fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first(map, keys).map(scalar_text).filter(|s| !s.is_empty())
}

fn required_text(
    map: &Map<String, Value>,
    keys: &[&str],
    shape: &'static str,
    field: &'static str,
) -> Result<String, TrackerError> {
    text(map, keys).ok_or(TrackerError::MissingField { shape, field })
}

/// Savings must be a finite, non-negative amount.
fn savings(map: &Map<String, Value>) -> Option<Result<f64, TrackerError>> {
    first(map, &["estimatedMonthlySavings"]).map(|v| {
        let amount = coerce_f64("estimatedMonthlySavings", v)?;
        if amount.is_finite() && amount >= 0.0 {
            Ok(amount)
        } else {
            Err(TrackerError::type_conversion("estimatedMonthlySavings", v))
        }
    })
}

fn integer(map: &Map<String, Value>, keys: &[&str], field: &str) -> Result<Option<i64>, TrackerError> {
    let Some(value) = first(map, keys) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| TrackerError::InvalidArgument(format!("{} must be an integer, got {}", field, value)))
}

/// Tag keys the tracker keeps as columns. Sources that already flattened
/// them onto the finding are merged into the tag list.
pub const TRACKED_TAG_KEYS: [&str; 4] = ["Name", "Cost Center", "Service Group", "Optimization Exemption"];

fn tags(map: &Map<String, Value>) -> Result<Vec<Tag>, TrackerError> {
    let mut tags = tag_list(map)?;
    for key in TRACKED_TAG_KEYS {
        if tags.iter().any(|t| t.key == key) {
            continue;
        }
        if let Some(value) = text(map, &[key]) {
            tags.push(Tag { key: key.to_string(), value });
        }
    }
    Ok(tags)
}

fn tag_list(map: &Map<String, Value>) -> Result<Vec<Tag>, TrackerError> {
    match first(map, &["tags", "Tags"]) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let obj = item
                    .as_object()
                    .ok_or_else(|| TrackerError::InvalidArgument(format!("tag is not an object: {}", item)))?;
                let key = text(obj, &["Key", "key"])
                    .ok_or_else(|| TrackerError::InvalidArgument(format!("tag has no key: {}", item)))?;
                let value = text(obj, &["Value", "value"]).unwrap_or_default();
                Ok(Tag { key, value })
            })
            .collect(),
        Some(other) => Err(TrackerError::InvalidArgument(format!("tags must be a list, got {}", other))),
    }
}

fn volume_spec(map: &Map<String, Value>) -> Result<VolumeSpec, TrackerError> {
    let volume_type = VolumeType::from(required_text(
        map,
        &["VolumeType", "Type", "volumeType"],
        "volume",
        "VolumeType",
    )?);
    let size_gib = integer(map, &["Size", "size"], "Size")?
        .ok_or(TrackerError::MissingField { shape: "volume", field: "Size" })?;
    Ok(VolumeSpec {
        volume_type,
        size_gib,
        iops: integer(map, &["Iops", "IOPS", "iops"], "Iops")?,
        throughput: integer(map, &["Throughput", "throughput"], "Throughput")?,
    })
}

fn extract_hub(map: &Map<String, Value>) -> Result<HubRecommendation, TrackerError> {
    const SHAPE: &str = "hub";
    let estimated_monthly_savings = savings(map)
        .ok_or(TrackerError::MissingField { shape: SHAPE, field: "estimatedMonthlySavings" })??;
    Ok(HubRecommendation {
        recommendation_id: required_text(map, &["recommendationId", "RecommendationId"], SHAPE, "recommendationId")?,
        account: required_text(map, &["accountId", "Account"], SHAPE, "accountId")?,
        resource_id: text(map, &["resourceId", "ResourceId"]),
        action_type: required_text(map, &["actionType"], SHAPE, "actionType")?,
        estimated_monthly_savings,
        current_resource_type: text(map, &["currentResourceType"]).unwrap_or_default(),
        current_resource_summary: text(map, &["currentResourceSummary"]).unwrap_or_default(),
        recommended_resource_summary: text(map, &["recommendedResourceSummary"]).unwrap_or_default(),
        tags: tags(map)?,
    })
}

fn extract_stopped_instance(map: &Map<String, Value>) -> Result<StoppedInstance, TrackerError> {
    const SHAPE: &str = "stopped-instance";
    let instance_id = required_text(map, &["resourceId", "InstanceId"], SHAPE, "resourceId")?;
    let account = required_text(map, &["Account", "accountId"], SHAPE, "Account")?;
    let instance_type = text(map, &["type", "InstanceType"]).unwrap_or_default();
    let platform = text(map, &["platform", "Platform"]);

    let mut volumes = Vec::new();
    let mut priced = true;
    if let Some(Value::Array(items)) = first(map, &["volumes", "Volumes"]) {
        for item in items {
            match item {
                Value::Object(obj) => volumes.push(AttachedVolume {
                    volume_id: text(obj, &["VolumeId", "volumeId"]).unwrap_or_default(),
                    spec: volume_spec(obj)?,
                }),
                // Bare volume ids carry no spec to price.
                _ => priced = false,
            }
        }
    }

    let tags = tags(map)?;
    match savings(map) {
        Some(amount) => {
            let amount = amount?;
            let recommendation_id = text(map, &["RecommendationId"])
                .unwrap_or_else(|| recommendation_id(&account, &instance_id, amount));
            Ok(StoppedInstance {
                instance_id,
                account,
                instance_type,
                platform,
                volumes,
                estimated_monthly_savings: amount,
                recommendation_id,
                tags,
            })
        }
        None if priced => StoppedInstance::priced(instance_id, account, instance_type, platform, volumes, tags),
        None => Err(TrackerError::MissingField { shape: SHAPE, field: "estimatedMonthlySavings" }),
    }
}

fn extract_unattached_volume(map: &Map<String, Value>) -> Result<UnattachedVolume, TrackerError> {
    const SHAPE: &str = "unattached-volume";
    let volume_id = required_text(map, &["resourceId", "VolumeId"], SHAPE, "resourceId")?;
    let account = required_text(map, &["Account", "accountId"], SHAPE, "Account")?;
    let spec = volume_spec(map)?;
    let tags = tags(map)?;
    match savings(map) {
        Some(amount) => {
            let amount = amount?;
            let recommendation_id = text(map, &["RecommendationId"])
                .unwrap_or_else(|| recommendation_id(&account, &volume_id, amount));
            Ok(UnattachedVolume {
                volume_id,
                account,
                spec,
                estimated_monthly_savings: amount,
                recommendation_id,
                tags,
            })
        }
        None => UnattachedVolume::priced(volume_id, account, spec, tags),
    }
}
