//! Flattening detections into an ingestion reading record.
//!
//! A frame with two people produces, in this order:
//!
//! ```text
//! person_1_label, person_1_score, person_1_x1, person_1_y1, person_1_x2, person_1_y2,
//! person_2_label, ..., person_2_y2,
//! count
//! ```
//!
//! Numbering is 1-based in detection order and only stable within one frame.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::detect::Detection;

pub const COUNT_KEY: &str = "count";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Text(String),
    Integer(i64),
}

impl ReadingValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ReadingValue::Integer(v) => Some(*v),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ReadingValue::Text(v) => Some(v),
            ReadingValue::Integer(_) => None,
        }
    }
}

/// Ordered key/value reading. Serializes as a JSON object in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadingRecord {
    fields: Vec<(String, ReadingValue)>,
}

impl ReadingRecord {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut fields = Vec::with_capacity(detections.len() * 6 + 1);
        for (index, det) in detections.iter().enumerate() {
            let prefix = format!("person_{}", index + 1);
            let bbox = det.bounding_box;
            fields.push((
                format!("{prefix}_label"),
                ReadingValue::Text(det.label.clone()),
            ));
            fields.push((
                format!("{prefix}_score"),
                ReadingValue::Integer(det.score as i64),
            ));
            fields.push((format!("{prefix}_x1"), ReadingValue::Integer(bbox.x1 as i64)));
            fields.push((format!("{prefix}_y1"), ReadingValue::Integer(bbox.y1 as i64)));
            fields.push((format!("{prefix}_x2"), ReadingValue::Integer(bbox.x2 as i64)));
            fields.push((format!("{prefix}_y2"), ReadingValue::Integer(bbox.y2 as i64)));
        }
        fields.push((
            COUNT_KEY.to_string(),
            ReadingValue::Integer(detections.len() as i64),
        ));
        Self { fields }
    }

    pub fn count(&self) -> usize {
        self.get(COUNT_KEY)
            .and_then(ReadingValue::as_integer)
            .unwrap_or_default() as usize
    }

    pub fn get(&self, key: &str) -> Option<&ReadingValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReadingValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for ReadingRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn person(score: u8, x1: i32) -> Detection {
        Detection {
            label: "person".to_string(),
            score,
            bounding_box: BoundingBox {
                x1,
                y1: 10,
                x2: x1 + 50,
                y2: 200,
            },
        }
    }

    #[test]
    fn empty_input_yields_only_count() {
        let record = ReadingRecord::from_detections(&[]);
        assert_eq!(record.len(), 1);
        assert_eq!(record.count(), 0);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"count":0}"#);
    }

    #[test]
    fn six_fields_per_detection_plus_count() {
        for n in 0..5 {
            let detections: Vec<_> = (0..n).map(|i| person(50 + i as u8, i * 10)).collect();
            let record = ReadingRecord::from_detections(&detections);
            assert_eq!(record.len(), 6 * n as usize + 1);
            assert_eq!(record.count(), n as usize);
            assert_eq!(record.keys().filter(|k| *k == COUNT_KEY).count(), 1);
        }
    }

    #[test]
    fn keys_are_one_based_in_input_order() {
        let record = ReadingRecord::from_detections(&[person(91, 96), person(64, 300)]);
        let keys: Vec<_> = record.keys().collect();
        assert_eq!(
            keys,
            vec![
                "person_1_label",
                "person_1_score",
                "person_1_x1",
                "person_1_y1",
                "person_1_x2",
                "person_1_y2",
                "person_2_label",
                "person_2_score",
                "person_2_x1",
                "person_2_y1",
                "person_2_x2",
                "person_2_y2",
                "count",
            ]
        );
        assert_eq!(
            record.get("person_1_label").and_then(ReadingValue::as_text),
            Some("person")
        );
        assert_eq!(
            record.get("person_2_score").and_then(ReadingValue::as_integer),
            Some(64)
        );
        assert_eq!(
            record.get("person_2_x2").and_then(ReadingValue::as_integer),
            Some(350)
        );
    }

    #[test]
    fn serializes_in_insertion_order() {
        let record = ReadingRecord::from_detections(&[person(72, 1)]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"person_1_label":"person","person_1_score":72,"person_1_x1":1,"person_1_y1":10,"person_1_x2":51,"person_1_y2":200,"count":1}"#
        );
    }
}
