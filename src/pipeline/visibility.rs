use std::collections::BTreeMap;

/// Sensor id → shown in chart.
pub type VisibilityMap = BTreeMap<String, bool>;

/// Reconcile visibility with a freshly built catalog.
///
/// Sensors already in `previous` keep their flag. New sensors take the
/// persisted preference from `seed`, or `true`. Sensors no longer in the
/// catalog are dropped.
#[must_use]
pub fn merge_visibility<F>(previous: &VisibilityMap, catalog: &[String], seed: F) -> VisibilityMap
where
    F: Fn(&str) -> Option<bool>,
{
    catalog
        .iter()
        .map(|sensor| {
            let shown = previous
                .get(sensor)
                .copied()
                .or_else(|| seed(sensor))
                .unwrap_or(true);
            (sensor.clone(), shown)
        })
        .collect()
}

/// Sensors of `catalog` currently shown, in catalog order.
#[must_use]
pub fn visible_sensors<'a>(catalog: &'a [String], visibility: &VisibilityMap) -> Vec<&'a str> {
    catalog
        .iter()
        .filter(|s| visibility.get(s.as_str()).copied().unwrap_or(true))
        .map(String::as_str)
        .collect()
}
