//! Record codec: flat text payload, `name;sets;reps` entries joined by `|`.

use crate::record::Record;

/// Field separator inside one record entry.
pub const FIELD_SEP: char = ';';
/// Record separator between entries.
pub const RECORD_SEP: char = '|';

const FIELDS_PER_RECORD: usize = 3;

/// Encode a batch into one payload. The format has no escaping, so a name
/// containing a separator (or an empty name) is rejected here instead of
/// being emitted as a payload the receiver would mis-split.
pub fn encode_batch(batch: &[Record]) -> Result<Vec<u8>, EncodeError> {
    let mut out = String::new();
    for (i, record) in batch.iter().enumerate() {
        if record.name.is_empty() {
            return Err(EncodeError::EmptyName);
        }
        if record.name.contains(FIELD_SEP) || record.name.contains(RECORD_SEP) {
            return Err(EncodeError::SeparatorInName {
                name: record.name.clone(),
            });
        }
        if i > 0 {
            out.push(RECORD_SEP);
        }
        out.push_str(&record.name);
        out.push(FIELD_SEP);
        out.push_str(&record.sets.to_string());
        out.push(FIELD_SEP);
        out.push_str(&record.reps.to_string());
    }
    Ok(out.into_bytes())
}

/// Error encoding a batch (unencodable record name).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("record name is empty")]
    EmptyName,
    #[error("record name {name:?} contains a separator")]
    SeparatorInName { name: String },
}

/// Decode a payload, best effort. An entry must split into exactly three
/// fields with a non-empty name or it is dropped; magnitudes that fail to
/// parse count as zero. A corrupt or foreign entry on a shared channel
/// must not poison the rest of the batch, so this never fails.
pub fn decode_batch(payload: &[u8]) -> Vec<Record> {
    let text = match std::str::from_utf8(payload) {
        Ok(t) => t,
        Err(_) => {
            log::debug!("discarding non-UTF-8 payload ({} bytes)", payload.len());
            return Vec::new();
        }
    };
    if text.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for entry in text.split(RECORD_SEP) {
        let fields: Vec<&str> = entry.split(FIELD_SEP).collect();
        if fields.len() != FIELDS_PER_RECORD || fields[0].is_empty() {
            log::debug!("dropping malformed entry {:?}", entry);
            continue;
        }
        let sets = fields[1].parse::<u32>().unwrap_or(0);
        let reps = fields[2].parse::<u32>().unwrap_or(0);
        out.push(Record::new(fields[0], sets, reps));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_payload() {
        let batch = vec![Record::new("Push-ups", 3, 15), Record::new("Squats", 4, 20)];
        let payload = encode_batch(&batch).unwrap();
        assert_eq!(payload, b"Push-ups;3;15|Squats;4;20");
    }

    #[test]
    fn roundtrip_single() {
        let batch = vec![Record::new("Lunges", 2, 12)];
        let payload = encode_batch(&batch).unwrap();
        assert_eq!(decode_batch(&payload), batch);
    }

    #[test]
    fn roundtrip_all_sizes() {
        for n in 1u32..=50 {
            let batch: Vec<Record> = (0..n)
                .map(|i| Record::new(format!("Exercise {}", i), i, i * 200 % 10_001))
                .collect();
            let payload = encode_batch(&batch).unwrap();
            assert_eq!(decode_batch(&payload), batch, "batch of {} records", n);
        }
    }

    #[test]
    fn corrupt_middle_entry_dropped() {
        let decoded = decode_batch(b"A;1;2|BAD|B;3;4");
        assert_eq!(decoded, vec![Record::new("A", 1, 2), Record::new("B", 3, 4)]);
    }

    #[test]
    fn numeric_fallback_to_zero() {
        let decoded = decode_batch(b"Lunges;abc;10");
        assert_eq!(decoded, vec![Record::new("Lunges", 0, 10)]);
    }

    #[test]
    fn negative_magnitude_falls_back_to_zero() {
        let decoded = decode_batch(b"Rows;-3;10");
        assert_eq!(decoded, vec![Record::new("Rows", 0, 10)]);
    }

    #[test]
    fn wrong_field_count_dropped() {
        assert!(decode_batch(b"A;1").is_empty());
        assert!(decode_batch(b"A;1;2;3").is_empty());
    }

    #[test]
    fn nameless_entry_dropped() {
        assert!(decode_batch(b";1;2").is_empty());
    }

    #[test]
    fn empty_payload_decodes_empty() {
        assert!(decode_batch(b"").is_empty());
    }

    #[test]
    fn non_utf8_payload_decodes_empty() {
        assert!(decode_batch(&[0xff, 0xfe, 0x00]).is_empty());
    }

    #[test]
    fn encode_rejects_field_separator_in_name() {
        let batch = vec![Record::new("Push;ups", 3, 15)];
        assert!(matches!(
            encode_batch(&batch),
            Err(EncodeError::SeparatorInName { .. })
        ));
    }

    #[test]
    fn encode_rejects_record_separator_in_name() {
        let batch = vec![Record::new("Push|ups", 3, 15)];
        assert!(matches!(
            encode_batch(&batch),
            Err(EncodeError::SeparatorInName { .. })
        ));
    }

    #[test]
    fn encode_rejects_empty_name() {
        let batch = vec![Record::new("", 3, 15)];
        assert!(matches!(encode_batch(&batch), Err(EncodeError::EmptyName)));
    }
}
