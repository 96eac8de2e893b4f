//! Packet-entity engine: PVS state transitions (§4.6) and per-entity
//! property deltas (§4.4, §4.7).

pub mod list;

use crate::bit::BitReader;
use crate::entity::list::{Entity, EntityList, InstanceBaseline, Value, MAX_EDICTS};
use crate::error::{ParseError, Result};
use crate::schema::{PropType, SendProp, ServerClass, COORD, NOSCALE, NORMAL, UNSIGNED};

/// Decodes a single flattened prop's value from the bit stream (§4.4).
pub fn decode_value(r: &mut BitReader, prop: &SendProp, array_element: Option<&SendProp>) -> Result<Value> {
    match prop.prop_type {
        PropType::Int => {
            let raw = r.read_bits(prop.num_bits.max(1))?;
            if prop.has_flag(UNSIGNED) {
                Ok(Value::Int(raw as i64))
            } else {
                let shift = 32 - prop.num_bits.max(1);
                Ok(Value::Int((((raw << shift) as i32) >> shift) as i64))
            }
        }
        PropType::Float => Ok(Value::Float(decode_float(r, prop)?)),
        PropType::Vector => {
            let x = decode_float(r, prop)?;
            let y = decode_float(r, prop)?;
            let z = if prop.has_flag(NORMAL) {
                r.read_normal()?
            } else {
                decode_float(r, prop)?
            };
            Ok(Value::Vector([x, y, z]))
        }
        PropType::VectorXy => {
            let x = decode_float(r, prop)?;
            let y = decode_float(r, prop)?;
            Ok(Value::VectorXy([x, y]))
        }
        PropType::String => {
            let len = r.read_bits(9)? as usize;
            let bytes = r.read_bytes(len)?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
        PropType::Int64 => {
            let low = r.read_bits(32)? as u64;
            let high = r.read_bits(32)? as u64;
            Ok(Value::Int64(((high << 32) | low) as i64))
        }
        PropType::Array => {
            let element = array_element
                .ok_or_else(|| ParseError::schema_invalid(0, "array prop missing element type"))?;
            let length_bits = (usize::BITS - prop.num_elements.max(1).leading_zeros()).max(1);
            let count = r.read_bits(length_bits)? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(decode_value(r, element, None)?);
            }
            Ok(Value::Array(values))
        }
        PropType::DataTable => Err(ParseError::schema_invalid(
            0,
            "DataTable prop reached value decoder",
        )),
    }
}

fn decode_float(r: &mut BitReader, prop: &SendProp) -> Result<f32> {
    if prop.has_flag(COORD) {
        return r.read_coord();
    }
    if prop.has_flag(NOSCALE) {
        let raw = r.read_bits(32)?;
        return Ok(f32::from_bits(raw));
    }
    let num_bits = prop.num_bits.max(1);
    let raw = r.read_bits(num_bits)?;
    let max = ((1u64 << num_bits) - 1) as f32;
    let fraction = raw as f32 / max;
    Ok(prop.low_value + fraction * (prop.high_value - prop.low_value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PvsState {
    EnterPvs,
    LeavePvs,
    Delta,
    Preserve,
    Finished,
}

/// A PVS-level state change surfaced to the caller so it can translate
/// the engine's internal bookkeeping into collaborator-visible events
/// (`DemoEvent::EntityEnter`/`EntityLeave`/`EntityUpdate`).
#[derive(Debug, Clone, Copy)]
pub enum EntityTransition {
    Enter { entity_id: i32, class_id: i16 },
    Leave { entity_id: i32 },
    Update { entity_id: i32 },
}

/// Applies a `svc_PacketEntities` payload against `entities`, using
/// `server_classes` to resolve each class's flattened schema and
/// `server_class_bits` for the header's class-id field width.
#[allow(clippy::too_many_arguments)]
pub fn process_packet_entities(
    data: &[u8],
    updated_entries: i32,
    is_delta: bool,
    update_baseline: bool,
    entities: &mut EntityList,
    server_classes: &[ServerClass],
    server_class_bits: u32,
    baselines: &mut InstanceBaseline,
    mut on_transition: impl FnMut(EntityTransition),
) -> Result<()> {
    let mut r = BitReader::new(data);
    let mut new_entity: i32 = -1;
    let mut header_count = updated_entries;

    loop {
        header_count -= 1;
        let is_entity = header_count >= 0;

        if !is_entity {
            break;
        }

        new_entity = new_entity + 1 + r.read_ubitvar()? as i32;

        let leave_pvs = r.read_bit()?;
        let mut enter_pvs = false;
        let mut force_delete = false;
        if !leave_pvs {
            enter_pvs = r.read_bit()?;
        } else {
            force_delete = r.read_bit()?;
        }

        if new_entity as usize >= MAX_EDICTS {
            return Err(ParseError::inconsistent(
                r.bits_remaining(),
                format!("entity id {new_entity} exceeds MAX_EDICTS"),
            ));
        }

        let state = if enter_pvs {
            PvsState::EnterPvs
        } else if leave_pvs {
            PvsState::LeavePvs
        } else {
            PvsState::Delta
        };

        match state {
            PvsState::EnterPvs => {
                let class_id = r.read_bits(server_class_bits)? as i16;
                let serial_num = r.read_bits(10)?;

                let class = server_classes
                    .iter()
                    .find(|c| c.class_id == class_id)
                    .ok_or_else(|| {
                        ParseError::schema_invalid(
                            r.bits_remaining(),
                            format!("unknown class_id {class_id}"),
                        )
                    })?;

                let mut entity = Entity::new(new_entity, class_id, serial_num);
                if let Some(baseline) = baselines.get(&class_id) {
                    for (idx, value) in baseline {
                        entity.props.insert(*idx, value.clone());
                    }
                }

                apply_property_deltas(&mut r, &mut entity, class)?;

                if update_baseline {
                    let snapshot: Vec<(usize, Value)> = entity
                        .props
                        .iter()
                        .map(|(k, v)| (*k, v.clone()))
                        .collect();
                    baselines.insert(class_id, snapshot);
                }

                entities.insert(new_entity as usize, entity);
                on_transition(EntityTransition::Enter {
                    entity_id: new_entity,
                    class_id,
                });
            }
            PvsState::LeavePvs => {
                if !is_delta {
                    return Err(ParseError::bad_delta(
                        r.bits_remaining(),
                        "LEAVE_PVS observed on a non-delta packet",
                    ));
                }
                // Treated as removal regardless of force_delete: this
                // parser is read-only and has no use for an inactive
                // entity that has left the PVS.
                let _ = force_delete;
                entities.remove(new_entity as usize);
                on_transition(EntityTransition::Leave {
                    entity_id: new_entity,
                });
            }
            PvsState::Delta => {
                let class_id = entities
                    .get(new_entity as usize)
                    .map(|e| e.server_class_id)
                    .ok_or_else(|| {
                        ParseError::inconsistent(
                            r.bits_remaining(),
                            format!("DELTA for unknown entity {new_entity}"),
                        )
                    })?;

                let class = server_classes
                    .iter()
                    .find(|c| c.class_id == class_id)
                    .ok_or_else(|| {
                        ParseError::schema_invalid(
                            r.bits_remaining(),
                            format!("unknown class_id {class_id}"),
                        )
                    })?;

                let entity = entities.get_mut(new_entity as usize).expect("checked above");
                apply_property_deltas(&mut r, entity, class)?;
                on_transition(EntityTransition::Update {
                    entity_id: new_entity,
                });
            }
            PvsState::Preserve | PvsState::Finished => unreachable!(),
        }
    }

    let _ = PvsState::Preserve;
    let _ = PvsState::Finished;
    Ok(())
}

/// Reads an index run (§4.7) and assigns each decoded value.
fn apply_property_deltas(r: &mut BitReader, entity: &mut Entity, class: &ServerClass) -> Result<()> {
    let n = class.flattened_props.len();
    let mut field_index: i32 = -1;

    loop {
        if !r.read_bit()? {
            break;
        }

        field_index = field_index + 1 + r.read_ubitint()? as i32;
        if field_index as usize >= n {
            return Err(ParseError::schema_invalid(
                r.bits_remaining(),
                format!("field_index {field_index} >= {n}"),
            ));
        }

        let flattened = &class.flattened_props[field_index as usize];
        let value = decode_value(
            r,
            &flattened.prop,
            flattened.array_element_prop.as_ref(),
        )?;
        entity.props.insert(field_index as usize, value);
    }

    Ok(())
}
