//! Hand-written message shapes for the handful of netmessages the core
//! pipeline actually branches on. Everything else passes through the
//! record demultiplexer as an opaque [`crate::event::NetMessage`].

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct SendPropDescriptor {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub var_name: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub flags: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub priority: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub dt_name: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub num_elements: Option<i32>,
    #[prost(float, optional, tag = "7")]
    pub low_value: Option<f32>,
    #[prost(float, optional, tag = "8")]
    pub high_value: Option<f32>,
    #[prost(int32, optional, tag = "9")]
    pub num_bits: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SendTable {
    #[prost(string, optional, tag = "1")]
    pub net_table_name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub props: Vec<SendPropDescriptor>,
    #[prost(bool, optional, tag = "3")]
    pub needs_decoder: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub is_end: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CreateStringTable {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub num_entries: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub user_data_fixed_size: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub user_data_size: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub user_data_size_bits: Option<i32>,
    #[prost(int32, optional, tag = "7")]
    pub flags: Option<i32>,
    #[prost(bytes, optional, tag = "8")]
    pub string_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateStringTable {
    #[prost(int32, optional, tag = "1")]
    pub table_id: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub num_changed_entries: Option<i32>,
    #[prost(bytes, optional, tag = "3")]
    pub string_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PacketEntities {
    #[prost(int32, optional, tag = "1")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub updated_entries: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub is_delta: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub update_baseline: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub baseline: Option<i32>,
    #[prost(bytes, optional, tag = "6")]
    pub entity_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameEventKeyDescriptor {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameEventDescriptor {
    #[prost(int32, optional, tag = "1")]
    pub eventid: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub keys: Vec<GameEventKeyDescriptor>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameEventList {
    #[prost(message, repeated, tag = "1")]
    pub descriptors: Vec<GameEventDescriptor>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameEventKey {
    #[prost(string, optional, tag = "1")]
    pub val_string: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub val_float: Option<f32>,
    #[prost(int32, optional, tag = "3")]
    pub val_long: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub val_short: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub val_byte: Option<i32>,
    #[prost(bool, optional, tag = "6")]
    pub val_bool: Option<bool>,
    #[prost(uint64, optional, tag = "7")]
    pub val_uint64: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameEvent {
    #[prost(int32, optional, tag = "1")]
    pub eventid: Option<i32>,
    #[prost(message, repeated, tag = "2")]
    pub keys: Vec<GameEventKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_table_round_trips_through_prost() {
        let table = SendTable {
            net_table_name: Some("DT_Foo".into()),
            props: vec![SendPropDescriptor {
                r#type: Some(0),
                var_name: Some("x".into()),
                flags: Some(1 << 6),
                priority: Some(10),
                dt_name: None,
                num_elements: None,
                low_value: Some(0.0),
                high_value: Some(1.0),
                num_bits: Some(8),
            }],
            needs_decoder: Some(false),
            is_end: Some(false),
        };

        let bytes = table.encode_to_vec();
        let decoded = SendTable::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, table);
    }
}
