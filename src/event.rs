//! The collaborator-facing event stream (§6): one flat sum type handed
//! to the caller's sink, no listener registry — callers that want to
//! filter by kind match on the enum themselves.

use crate::game_event::NormalizedGameEvent;
use crate::header::DemoHeader;

/// One unit of parser output, in stream order. Variants whose
/// production is gated by a `ParserConfig::emit_*` flag are simply not
/// produced when that flag is off; there is no corresponding "disabled"
/// variant.
#[derive(Debug, Clone)]
pub enum DemoEvent {
    /// Emitted once, immediately after the fixed header is parsed.
    Header(DemoHeader),

    /// Emitted once the DATATABLES command has been fully parsed into
    /// flattened per-class schemas. Gated by `emit_data_tables`.
    DataTables,

    /// A string table came into existence via `svc_CreateStringTable`
    /// (or was first seen in a STRINGTABLES full snapshot). Gated by
    /// `emit_string_tables`.
    StringTableCreated { table_id: usize, name: String },

    /// An existing string table was updated. Gated by
    /// `emit_string_tables`.
    StringTableUpdated { table_id: usize, name: String },

    /// An entity entered the PVS. Gated by `emit_packet_entities`.
    EntityEnter { entity_id: i32, class_id: i16 },

    /// An entity left the PVS (treated as removal, see DESIGN.md).
    /// Gated by `emit_packet_entities`.
    EntityLeave { entity_id: i32 },

    /// An already-live entity received a property delta. Gated by
    /// `emit_packet_entities`.
    EntityUpdate { entity_id: i32 },

    /// A normalized (or catch-all) game event.
    GameEvent(NormalizedGameEvent),

    /// An opaque user message the core doesn't branch on (§3.1).
    UserMessage { msg_type: i32, data: Vec<u8> },

    /// An opaque net message the core doesn't branch on (§3.1). Gated
    /// by `emit_net_messages`.
    NetMessage { msg_type: i32, data: Vec<u8> },

    /// Emitted before each command record's tick is applied, mirroring
    /// the teacher's "notifies listeners before changing the tick, last
    /// tick is not notified" contract.
    Tick { tick: i32 },

    /// Emitted once, after the STOP command (or end of stream).
    End,
}
