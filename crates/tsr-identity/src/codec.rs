use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tsr_types::{FieldId, Guid, ObjectId};

use crate::error::{IdentityError, IdentityResult};
use crate::object::{FieldValue, Fields};

/// Encoding of an object's field values to and from a byte payload.
///
/// References leave the process as guids and come back through `resolve`,
/// which the identity map points at its own canonicalization so decoded
/// references are always canonical ids.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, fields: &Fields) -> IdentityResult<Vec<u8>>;

    fn decode(
        &self,
        data: &[u8],
        resolve: &mut dyn FnMut(Guid) -> ObjectId,
    ) -> IdentityResult<Fields>;

    /// Guids referenced by an encoded payload, without materializing it.
    fn referenced_guids(&self, data: &[u8]) -> IdentityResult<Vec<Guid>>;
}

#[derive(Serialize, Deserialize)]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    MultiText(BTreeMap<u32, String>),
    Bytes(Vec<u8>),
    Ref(Guid),
    RefSeq(Vec<Guid>),
}

/// Default codec: bincode over a field-id/value list.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    fn decode_wire(data: &[u8]) -> IdentityResult<Vec<(u32, WireValue)>> {
        bincode::deserialize(data).map_err(|e| IdentityError::Codec(e.to_string()))
    }
}

impl PayloadCodec for BincodeCodec {
    fn encode(&self, fields: &Fields) -> IdentityResult<Vec<u8>> {
        let wire: Vec<(u32, WireValue)> = fields
            .iter()
            .map(|(field, value)| {
                let value = match value {
                    FieldValue::Null => WireValue::Null,
                    FieldValue::Bool(b) => WireValue::Bool(*b),
                    FieldValue::Int(i) => WireValue::Int(*i),
                    FieldValue::Text(s) => WireValue::Text(s.clone()),
                    FieldValue::MultiText(alts) => WireValue::MultiText(alts.clone()),
                    FieldValue::Bytes(b) => WireValue::Bytes(b.clone()),
                    FieldValue::Ref(id) => WireValue::Ref(id.guid()),
                    FieldValue::RefSeq(ids) => {
                        WireValue::RefSeq(ids.iter().map(ObjectId::guid).collect())
                    }
                };
                (field.0, value)
            })
            .collect();
        bincode::serialize(&wire).map_err(|e| IdentityError::Codec(e.to_string()))
    }

    fn decode(
        &self,
        data: &[u8],
        resolve: &mut dyn FnMut(Guid) -> ObjectId,
    ) -> IdentityResult<Fields> {
        let mut fields = Fields::new();
        for (field, value) in Self::decode_wire(data)? {
            let value = match value {
                WireValue::Null => continue,
                WireValue::Bool(b) => FieldValue::Bool(b),
                WireValue::Int(i) => FieldValue::Int(i),
                WireValue::Text(s) => FieldValue::Text(s),
                WireValue::MultiText(alts) => FieldValue::MultiText(alts),
                WireValue::Bytes(b) => FieldValue::Bytes(b),
                WireValue::Ref(guid) => FieldValue::Ref(resolve(guid)),
                WireValue::RefSeq(guids) => {
                    FieldValue::RefSeq(guids.into_iter().map(|g| resolve(g)).collect())
                }
            };
            fields.insert(FieldId(field), value);
        }
        Ok(fields)
    }

    fn referenced_guids(&self, data: &[u8]) -> IdentityResult<Vec<Guid>> {
        let mut guids = Vec::new();
        for (_, value) in Self::decode_wire(data)? {
            match value {
                WireValue::Ref(guid) => guids.push(guid),
                WireValue::RefSeq(seq) => guids.extend(seq),
                _ => {}
            }
        }
        Ok(guids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_values() {
        let target = ObjectId::new(Guid::new());
        let mut fields = Fields::new();
        fields.insert(FieldId(1), FieldValue::Text("lemma".into()));
        fields.insert(FieldId(2), FieldValue::Ref(target.clone()));
        fields.insert(
            FieldId(3),
            FieldValue::MultiText(BTreeMap::from([(1, "en".to_string())])),
        );

        let codec = BincodeCodec;
        let data = codec.encode(&fields).unwrap();
        let mut resolved = Vec::new();
        let decoded = codec
            .decode(&data, &mut |g| {
                resolved.push(g);
                ObjectId::new(g)
            })
            .unwrap();

        assert_eq!(decoded, fields);
        assert_eq!(resolved, vec![target.guid()]);
    }

    #[test]
    fn referenced_guids_without_resolving() {
        let a = ObjectId::new(Guid::new());
        let b = ObjectId::new(Guid::new());
        let mut fields = Fields::new();
        fields.insert(FieldId(1), FieldValue::RefSeq(vec![a.clone(), b.clone()]));
        fields.insert(FieldId(2), FieldValue::Int(3));

        let codec = BincodeCodec;
        let data = codec.encode(&fields).unwrap();
        assert_eq!(codec.referenced_guids(&data).unwrap(), vec![a.guid(), b.guid()]);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = BincodeCodec.referenced_guids(&[0xff; 3]).unwrap_err();
        assert!(matches!(err, IdentityError::Codec(_)));
    }
}
