//! Game-event normalization (§4.8): descriptor merge plus per-event
//! zipping of the descriptor's key names onto the message's positional
//! key values.

use foldhash::HashMap;

use crate::protobuf;
use crate::string_table::PlayerRegistry;

/// One typed value out of a `GameEvent`'s key list.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEventValue {
    Str(String),
    Float(f32),
    Long(i32),
    Short(i32),
    Byte(i32),
    Bool(bool),
    UInt64(u64),
    Unset,
}

impl GameEventValue {
    fn from_key(key: &protobuf::GameEventKey) -> Self {
        if let Some(v) = &key.val_string {
            return GameEventValue::Str(v.clone());
        }
        if let Some(v) = key.val_float {
            return GameEventValue::Float(v);
        }
        if let Some(v) = key.val_long {
            return GameEventValue::Long(v);
        }
        if let Some(v) = key.val_short {
            return GameEventValue::Short(v);
        }
        if let Some(v) = key.val_byte {
            return GameEventValue::Byte(v);
        }
        if let Some(v) = key.val_bool {
            return GameEventValue::Bool(v);
        }
        if let Some(v) = key.val_uint64 {
            return GameEventValue::UInt64(v);
        }
        GameEventValue::Unset
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GameEventValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            GameEventValue::Long(v) | GameEventValue::Short(v) | GameEventValue::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GameEventValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A decoded event with its keys zipped into a name-addressable map,
/// plus the catch-all shape the dispatcher emits for events nobody
/// normalizes by name.
#[derive(Debug, Clone)]
pub struct GenericGameEvent {
    pub name: String,
    pub values: HashMap<String, GameEventValue>,
}

impl GenericGameEvent {
    pub fn get(&self, key: &str) -> Option<&GameEventValue> {
        self.values.get(key)
    }
}

/// The small set of events the dispatcher recognizes by name and
/// reshapes into a typed variant (§4.8); everything else surfaces as
/// [`GenericGameEvent`].
#[derive(Debug, Clone)]
pub enum NormalizedGameEvent {
    PlayerConnect {
        user_id: i32,
        name: String,
    },
    PlayerDisconnect {
        user_id: i32,
        reason: String,
    },
    PlayerDeath {
        victim_user_id: i32,
        attacker_user_id: i32,
        weapon: String,
        headshot: bool,
    },
    RoundAnnounceMatchStart,
    Other(GenericGameEvent),
}

#[derive(Debug, Clone)]
struct DescriptorEntry {
    name: String,
    key_names: Vec<String>,
}

/// Maintains the event-id → `{name, key names}` mapping merged from
/// `svc_GameEventList` records, and resolves incoming `svc_GameEvent`
/// records against it.
#[derive(Debug, Default)]
pub struct GameEventRegistry {
    descriptors: HashMap<i32, DescriptorEntry>,
}

impl GameEventRegistry {
    /// Merges a freshly-received descriptor list into the registry.
    /// Later lists overwrite earlier entries for the same id, matching
    /// the state container's single `game_event_descriptors` registry
    /// (§3) rather than a versioned history.
    pub fn merge(&mut self, list: &protobuf::GameEventList) {
        for descriptor in &list.descriptors {
            let (Some(event_id), Some(name)) = (descriptor.eventid, descriptor.name.clone()) else {
                continue;
            };
            let key_names = descriptor
                .keys
                .iter()
                .map(|k| k.name.clone().unwrap_or_default())
                .collect();
            self.descriptors
                .insert(event_id, DescriptorEntry { name, key_names });
        }
    }

    /// Zips the message's positional key values onto the descriptor's
    /// key names, then reshapes well-known event names into their
    /// typed variant. Returns `None` for an unresolvable event id
    /// (descriptor never arrived) rather than failing the whole parse.
    pub fn normalize(
        &self,
        event: &protobuf::GameEvent,
        players: &PlayerRegistry,
    ) -> Option<NormalizedGameEvent> {
        let event_id = event.eventid?;
        let descriptor = self.descriptors.get(&event_id)?;

        let mut values = HashMap::default();
        for (i, key) in event.keys.iter().enumerate() {
            let name = descriptor
                .key_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("key{i}"));
            values.insert(name, GameEventValue::from_key(key));
        }

        let generic = GenericGameEvent {
            name: descriptor.name.clone(),
            values,
        };

        Some(match generic.name.as_str() {
            "player_connect" => {
                let user_id = generic.get("userid").and_then(|v| v.as_i32()).unwrap_or(0);
                let name = generic
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_default();
                NormalizedGameEvent::PlayerConnect { user_id, name }
            }
            "player_disconnect" => {
                let user_id = generic.get("userid").and_then(|v| v.as_i32()).unwrap_or(0);
                let reason = generic
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_default();
                NormalizedGameEvent::PlayerDisconnect { user_id, reason }
            }
            "player_death" => {
                let victim_user_id = generic.get("userid").and_then(|v| v.as_i32()).unwrap_or(0);
                let attacker_user_id = generic.get("attacker").and_then(|v| v.as_i32()).unwrap_or(0);
                let weapon = generic
                    .get("weapon")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_default();
                let headshot = generic.get("headshot").and_then(|v| v.as_bool()).unwrap_or(false);
                let _ = players.get_by_user_id(victim_user_id);
                NormalizedGameEvent::PlayerDeath {
                    victim_user_id,
                    attacker_user_id,
                    weapon,
                    headshot,
                }
            }
            "round_announce_match_start" => NormalizedGameEvent::RoundAnnounceMatchStart,
            _ => NormalizedGameEvent::Other(generic),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_list() -> protobuf::GameEventList {
        protobuf::GameEventList {
            descriptors: vec![protobuf::GameEventDescriptor {
                eventid: Some(7),
                name: Some("player_death".into()),
                keys: vec![
                    protobuf::GameEventKeyDescriptor {
                        r#type: Some(3),
                        name: Some("userid".into()),
                    },
                    protobuf::GameEventKeyDescriptor {
                        r#type: Some(3),
                        name: Some("attacker".into()),
                    },
                    protobuf::GameEventKeyDescriptor {
                        r#type: Some(1),
                        name: Some("weapon".into()),
                    },
                    protobuf::GameEventKeyDescriptor {
                        r#type: Some(6),
                        name: Some("headshot".into()),
                    },
                ],
            }],
        }
    }

    #[test]
    fn merges_descriptor_and_normalizes_player_death() {
        let mut registry = GameEventRegistry::default();
        registry.merge(&descriptor_list());

        let players = PlayerRegistry::default();
        let event = protobuf::GameEvent {
            eventid: Some(7),
            keys: vec![
                protobuf::GameEventKey {
                    val_long: Some(3),
                    ..Default::default()
                },
                protobuf::GameEventKey {
                    val_long: Some(9),
                    ..Default::default()
                },
                protobuf::GameEventKey {
                    val_string: Some("ak47".into()),
                    ..Default::default()
                },
                protobuf::GameEventKey {
                    val_bool: Some(true),
                    ..Default::default()
                },
            ],
        };

        let normalized = registry.normalize(&event, &players).unwrap();
        match normalized {
            NormalizedGameEvent::PlayerDeath {
                victim_user_id,
                attacker_user_id,
                weapon,
                headshot,
            } => {
                assert_eq!(victim_user_id, 3);
                assert_eq!(attacker_user_id, 9);
                assert_eq!(weapon, "ak47");
                assert!(headshot);
            }
            other => panic!("expected PlayerDeath, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_event_id_returns_none() {
        let registry = GameEventRegistry::default();
        let players = PlayerRegistry::default();
        let event = protobuf::GameEvent {
            eventid: Some(99),
            keys: vec![],
        };
        assert!(registry.normalize(&event, &players).is_none());
    }

    #[test]
    fn unrecognized_name_falls_back_to_other() {
        let mut registry = GameEventRegistry::default();
        registry.merge(&protobuf::GameEventList {
            descriptors: vec![protobuf::GameEventDescriptor {
                eventid: Some(1),
                name: Some("weapon_fire".into()),
                keys: vec![protobuf::GameEventKeyDescriptor {
                    r#type: Some(1),
                    name: Some("weapon".into()),
                }],
            }],
        });

        let players = PlayerRegistry::default();
        let event = protobuf::GameEvent {
            eventid: Some(1),
            keys: vec![protobuf::GameEventKey {
                val_string: Some("glock".into()),
                ..Default::default()
            }],
        };

        match registry.normalize(&event, &players).unwrap() {
            NormalizedGameEvent::Other(generic) => {
                assert_eq!(generic.name, "weapon_fire");
                assert_eq!(generic.get("weapon").unwrap().as_str(), Some("glock"));
            }
            other => panic!("expected Other, got {other:?}"),
        }
    }
}
