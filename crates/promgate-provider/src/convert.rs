//! Conversion of backend query results into API values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use promgate_core::{
    ExternalMetricValue, GroupResource, LabelRequirement, MetricValue, QueryResult, ResourceRef,
    Sample, METRIC_NAME_LABEL,
};

use crate::error::{ProviderError, ProviderResult};

/// Values for a set of objects.
///
/// Objects whose label value appeared on more than one row are left out
/// of `items` and listed in `ambiguous`; the rest are still served.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValueList {
    pub items: Vec<MetricValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguous: Vec<AmbiguousObject>,
}

/// An object the result held several rows for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousObject {
    pub object: ResourceRef,
    pub rows: usize,
}

/// What a query for objects asked for.
pub(crate) struct ObjectRequest<'a> {
    pub resource: &'a GroupResource,
    pub namespace: Option<&'a str>,
    pub names: &'a [String],
    pub metric: &'a str,
    pub selector: &'a [LabelRequirement],
    /// Label holding object names in the result rows.
    pub resource_label: &'a str,
}

/// Attribute each row to the object named by its resource label. Rows for
/// objects that were not requested are dropped; requested objects without
/// a row are omitted.
pub(crate) fn object_values(
    result: QueryResult,
    req: &ObjectRequest<'_>,
) -> ProviderResult<MetricValueList> {
    let samples = match result {
        QueryResult::Vector(samples) => samples,
        QueryResult::Scalar(_) => {
            return Err(ProviderError::Query(format!(
                "query for {} returned a scalar, expected one row per object",
                req.metric
            )));
        }
    };

    let mut by_name: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        let Some(name) = sample.labels.get(req.resource_label).cloned() else {
            debug!(label = req.resource_label, "row lacks the resource label, dropping");
            continue;
        };
        if !req.names.is_empty() && !req.names.contains(&name) {
            continue;
        }
        by_name.entry(name).or_default().push(sample);
    }

    let mut list = MetricValueList::default();
    for (name, mut rows) in by_name {
        let object = ResourceRef::new(req.resource, req.namespace, &name);
        if rows.len() > 1 {
            warn!(object = %object, rows = rows.len(), metric = req.metric, "ambiguous result rows");
            list.ambiguous.push(AmbiguousObject {
                object,
                rows: rows.len(),
            });
            continue;
        }
        if let Some(sample) = rows.pop() {
            list.items.push(MetricValue {
                described_object: object,
                metric: req.metric.to_string(),
                timestamp: sample.timestamp,
                value: sample.value,
                selector: req.selector.to_vec(),
            });
        }
    }

    Ok(list)
}

/// One external value per row, labelled with the row's labels minus the
/// metric name. A scalar becomes a single unlabelled value.
pub(crate) fn external_values(result: QueryResult, metric: &str) -> Vec<ExternalMetricValue> {
    let to_value = |mut sample: Sample| {
        sample.labels.remove(METRIC_NAME_LABEL);
        ExternalMetricValue {
            metric: metric.to_string(),
            labels: sample.labels,
            timestamp: sample.timestamp,
            value: sample.value,
        }
    };

    match result {
        QueryResult::Vector(samples) => samples.into_iter().map(to_value).collect(),
        QueryResult::Scalar(sample) => vec![to_value(sample)],
    }
}
