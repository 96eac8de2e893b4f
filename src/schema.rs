//! Send-table schema model and the class-flattening algorithm (§4.3).

use crate::byte::ByteReader;
use crate::error::{ParseError, Result};
use crate::protobuf;

// Bit positions follow the CS:GO SDK's `dt_common.h` `SPROP_*` flags
// (cross-checked against `examples/original_source/src/demo_parse_test.py:74-79`
// for the ones it pins explicitly).
pub const UNSIGNED: u32 = 1 << 0;
pub const COORD: u32 = 1 << 1;
pub const NOSCALE: u32 = 1 << 2;
pub const NORMAL: u32 = 1 << 5;
pub const EXCLUDE: u32 = 1 << 6;
pub const INSIDEARRAY: u32 = 1 << 8;
pub const COLLAPSIBLE: u32 = 1 << 11;
pub const CHANGES_OFTEN: u32 = 1 << 15;

pub const CHANGES_OFTEN_PRIORITY: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Int,
    Float,
    Vector,
    VectorXy,
    String,
    Array,
    DataTable,
    Int64,
}

impl PropType {
    fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => PropType::Int,
            1 => PropType::Float,
            2 => PropType::Vector,
            3 => PropType::VectorXy,
            4 => PropType::String,
            5 => PropType::Array,
            6 => PropType::DataTable,
            7 => PropType::Int64,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SendProp {
    pub prop_type: PropType,
    pub flags: u32,
    pub var_name: String,
    pub dt_name: String,
    pub priority: u8,
    pub low_value: f32,
    pub high_value: f32,
    pub num_bits: u32,
    pub num_elements: u32,
}

impl SendProp {
    fn from_descriptor(d: &protobuf::SendPropDescriptor, offset: u64) -> Result<Self> {
        let prop_type = PropType::from_i32(d.r#type.unwrap_or(0))
            .ok_or_else(|| ParseError::schema_invalid(offset, "unknown SendProp type"))?;

        Ok(Self {
            prop_type,
            flags: d.flags.unwrap_or(0) as u32,
            var_name: d.var_name.clone().unwrap_or_default(),
            dt_name: d.dt_name.clone().unwrap_or_default(),
            priority: d.priority.unwrap_or(0) as u8,
            low_value: d.low_value.unwrap_or(0.0),
            high_value: d.high_value.unwrap_or(0.0),
            num_bits: d.num_bits.unwrap_or(0) as u32,
            num_elements: d.num_elements.unwrap_or(0) as u32,
        })
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Debug, Clone)]
pub struct SendTable {
    pub net_table_name: String,
    pub props: Vec<SendProp>,
    pub needs_decoder: bool,
}

impl SendTable {
    fn from_descriptor(t: &protobuf::SendTable, offset: u64) -> Result<Self> {
        let props = t
            .props
            .iter()
            .map(|p| SendProp::from_descriptor(p, offset))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            net_table_name: t.net_table_name.clone().unwrap_or_default(),
            props,
            needs_decoder: t.needs_decoder.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FlattenedProp {
    pub prop: SendProp,
    pub array_element_prop: Option<SendProp>,
}

#[derive(Debug, Clone)]
pub struct ServerClass {
    pub class_id: i16,
    pub name: String,
    pub dt_name: String,
    pub data_table_index: usize,
    pub flattened_props: Vec<FlattenedProp>,
}

struct Exclude {
    var_name: String,
    dt_name: String,
    #[allow(dead_code)]
    excluding_table_name: String,
}

struct ServerClassStub {
    class_id: i16,
    name: String,
    dt_name: String,
}

pub fn parse_data_tables(payload: &[u8]) -> Result<(Vec<SendTable>, Vec<ServerClass>)> {
    let mut r = ByteReader::new(payload);
    let mut data_tables = Vec::new();

    loop {
        let offset = r.position() as u64;
        let _type = r.read_varint32()?;
        let length = r.read_varint32()? as usize;
        let bytes = r.read_bytes(length)?;

        let descriptor = protobuf::SendTable::decode_bytes(bytes, offset)?;
        let table = SendTable::from_descriptor(&descriptor, offset)?;
        let is_end = descriptor.is_end.unwrap_or(false);

        if is_end {
            break;
        }
        data_tables.push(table);
    }

    let num_server_classes = r.read_i16_le()?;
    if num_server_classes < 0 {
        return Err(ParseError::schema_invalid(
            r.position() as u64,
            "negative num_server_classes",
        ));
    }

    let mut stubs = Vec::with_capacity(num_server_classes as usize);
    for _ in 0..num_server_classes {
        let class_id = r.read_i16_le()?;
        let name = r.read_null_terminated(256)?;
        let dt_name = r.read_null_terminated(256)?;
        stubs.push(ServerClassStub {
            class_id,
            name,
            dt_name,
        });
    }

    let mut server_classes = Vec::with_capacity(stubs.len());
    for stub in stubs {
        if stub.class_id < 0 || stub.class_id as i32 >= num_server_classes as i32 {
            return Err(ParseError::schema_invalid(
                r.position() as u64,
                format!("class_id {} out of range", stub.class_id),
            ));
        }

        let data_table_index = data_tables
            .iter()
            .position(|t| t.net_table_name == stub.dt_name)
            .ok_or_else(|| {
                ParseError::schema_invalid(
                    r.position() as u64,
                    format!("unresolved dt_name {}", stub.dt_name),
                )
            })?;

        let flattened_props = flatten_class(&data_tables, data_table_index)?;

        server_classes.push(ServerClass {
            class_id: stub.class_id,
            name: stub.name,
            dt_name: stub.dt_name,
            data_table_index,
            flattened_props,
        });
    }

    Ok((data_tables, server_classes))
}

fn gather_excludes(tables: &[SendTable], table_index: usize, excludes: &mut Vec<Exclude>) {
    let table = &tables[table_index];
    for prop in &table.props {
        if prop.has_flag(EXCLUDE) {
            // `dt_name` on an EXCLUDE prop names the table the excluded
            // var actually lives in, not the table doing the excluding.
            excludes.push(Exclude {
                var_name: prop.var_name.clone(),
                dt_name: prop.dt_name.clone(),
                excluding_table_name: table.net_table_name.clone(),
            });
        }
        if prop.prop_type == PropType::DataTable {
            if let Some(idx) = tables.iter().position(|t| t.net_table_name == prop.dt_name) {
                gather_excludes(tables, idx, excludes);
            }
        }
    }
}

/// `table_name` is the table currently being scanned for props (the one
/// that may *contain* the excluded var), matched against the exclude
/// entry's `dt_name` — not the table that carried the `EXCLUDE` flag.
fn is_excluded(excludes: &[Exclude], table_name: &str, var_name: &str) -> bool {
    excludes
        .iter()
        .any(|e| e.dt_name == table_name && e.var_name == var_name)
}

fn gather_props(
    tables: &[SendTable],
    table_index: usize,
    excludes: &[Exclude],
    out: &mut Vec<FlattenedProp>,
) {
    let table = &tables[table_index];
    let mut prev_sibling: Option<SendProp> = None;

    for prop in &table.props {
        if prop.has_flag(INSIDEARRAY)
            || prop.has_flag(EXCLUDE)
            || is_excluded(excludes, &table.net_table_name, &prop.var_name)
        {
            prev_sibling = Some(prop.clone());
            continue;
        }

        if prop.prop_type == PropType::DataTable {
            // Collapsible or not, the sub-table's props join this same
            // flat list — there is only ever one flattened list per class.
            if let Some(idx) = tables.iter().position(|t| t.net_table_name == prop.dt_name) {
                gather_props(tables, idx, excludes, out);
            }
            prev_sibling = Some(prop.clone());
            continue;
        }

        if prop.prop_type == PropType::Array {
            out.push(FlattenedProp {
                prop: prop.clone(),
                array_element_prop: prev_sibling.clone(),
            });
        } else {
            out.push(FlattenedProp {
                prop: prop.clone(),
                array_element_prop: None,
            });
        }

        prev_sibling = Some(prop.clone());
    }
}

/// Sorts a flattened list by priority: collect distinct priorities (plus
/// 64), ascending; for each, stably move every prop matching that
/// priority (or, for 64, every `CHANGES_OFTEN` prop) to the front of the
/// unplaced remainder.
fn sort_by_priority(props: &mut [FlattenedProp]) {
    let mut priorities: Vec<u8> = props.iter().map(|p| p.prop.priority).collect();
    priorities.push(CHANGES_OFTEN_PRIORITY);
    priorities.sort_unstable();
    priorities.dedup();

    let mut start = 0usize;
    for &priority in &priorities {
        let mut i = start;
        while i < props.len() {
            let matches = props[i].prop.priority == priority
                || (priority == CHANGES_OFTEN_PRIORITY && props[i].prop.has_flag(CHANGES_OFTEN));
            if matches {
                props[start..=i].rotate_right(1);
                start += 1;
            }
            i += 1;
        }
    }
}

fn flatten_class(tables: &[SendTable], table_index: usize) -> Result<Vec<FlattenedProp>> {
    let mut excludes = Vec::new();
    gather_excludes(tables, table_index, &mut excludes);

    let mut flattened = Vec::new();
    gather_props(tables, table_index, &excludes, &mut flattened);

    sort_by_priority(&mut flattened);
    Ok(flattened)
}

/// `floor(log2(num_server_classes)) + 1`, always at least 1.
pub fn server_class_bits(num_server_classes: usize) -> u32 {
    if num_server_classes == 0 {
        return 1;
    }
    (usize::BITS - (num_server_classes.max(1)).leading_zeros()).max(1)
}

trait DecodeAt: Sized {
    fn decode_bytes(bytes: &[u8], offset: u64) -> Result<Self>;
}

impl DecodeAt for protobuf::SendTable {
    fn decode_bytes(bytes: &[u8], offset: u64) -> Result<Self> {
        use prost::Message;
        Self::decode(bytes).map_err(|source| ParseError::ProtobufDecode { offset, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(name: &str, priority: u8, flags: u32) -> SendProp {
        SendProp {
            prop_type: PropType::Int,
            flags,
            var_name: name.into(),
            dt_name: String::new(),
            priority,
            low_value: 0.0,
            high_value: 0.0,
            num_bits: 8,
            num_elements: 0,
        }
    }

    #[test]
    fn flattens_collapsible_datatable_priority_ascending_with_changes_often_bucketed_at_64() {
        let table_b = SendTable {
            net_table_name: "B".into(),
            needs_decoder: false,
            props: vec![{
                let mut p = prop("y", 100, CHANGES_OFTEN);
                p.flags |= CHANGES_OFTEN;
                p
            }],
        };

        let table_a = SendTable {
            net_table_name: "A".into(),
            needs_decoder: false,
            props: vec![
                prop("x", 10, 0),
                SendProp {
                    prop_type: PropType::DataTable,
                    flags: COLLAPSIBLE,
                    var_name: "b".into(),
                    dt_name: "B".into(),
                    priority: 0,
                    low_value: 0.0,
                    high_value: 0.0,
                    num_bits: 0,
                    num_elements: 0,
                },
            ],
        };

        let tables = vec![table_a, table_b];
        let flattened = flatten_class(&tables, 0).unwrap();
        let names: Vec<&str> = flattened
            .iter()
            .map(|f| f.prop.var_name.as_str())
            .collect();
        // Distinct priorities ascending are [10, 64, 100]: `x` (priority
        // 10) is placed in the priority-10 pass, `y` (CHANGES_OFTEN,
        // bucketed at 64 regardless of its own numeric priority of 100)
        // in the 64 pass — `x` precedes `y`.
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn excluded_prop_is_dropped() {
        let table_b = SendTable {
            net_table_name: "B".into(),
            needs_decoder: false,
            props: vec![prop("hidden", 0, 0)],
        };
        let table_a = SendTable {
            net_table_name: "A".into(),
            needs_decoder: false,
            props: vec![
                SendProp {
                    prop_type: PropType::Int,
                    flags: EXCLUDE,
                    var_name: "hidden".into(),
                    dt_name: "B".into(),
                    priority: 0,
                    low_value: 0.0,
                    high_value: 0.0,
                    num_bits: 0,
                    num_elements: 0,
                },
                SendProp {
                    prop_type: PropType::DataTable,
                    flags: COLLAPSIBLE,
                    var_name: "b".into(),
                    dt_name: "B".into(),
                    priority: 0,
                    low_value: 0.0,
                    high_value: 0.0,
                    num_bits: 0,
                    num_elements: 0,
                },
            ],
        };

        let flattened = flatten_class(&[table_a, table_b], 0).unwrap();
        assert!(flattened.is_empty());
    }

    #[test]
    fn server_class_bits_matches_power_of_two_bound() {
        assert_eq!(server_class_bits(1), 1);
        assert_eq!(server_class_bits(2), 2);
        assert_eq!(server_class_bits(255), 8);
        assert_eq!(server_class_bits(256), 9);
    }
}
