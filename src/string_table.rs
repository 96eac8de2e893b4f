//! String-table engine: full snapshots and differential updates over a
//! 32-entry substring-dictionary history (§4.5).

use std::collections::VecDeque;

use foldhash::HashMap;

use crate::bit::BitReader;
use crate::byte::ByteReader;
use crate::error::{ParseError, Result};
use crate::protobuf;

pub const USERINFO_TABLE_NAME: &str = "userinfo";
const MAX_TABLE_NAME: usize = 256;
const MAX_KEY_LEN: usize = 1024;
const MAX_KEY_LEN_FULL_SNAPSHOT: usize = 4096;
const HISTORY_SIZE: usize = 32;

/// One row of a [`StringTable`]. Keys are not unique by contract; updates
/// address rows by index, not by key.
#[derive(Debug, Clone, Default)]
pub struct StringEntry {
    pub key: String,
    pub user_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct StringTable {
    pub name: String,
    pub max_entries: u32,
    pub user_data_fixed_size: bool,
    pub user_data_size: u32,
    pub user_data_size_bits: u32,
    pub entries: Vec<StringEntry>,
}

impl StringTable {
    pub fn new(name: impl Into<String>, max_entries: u32) -> Self {
        Self {
            name: name.into(),
            max_entries,
            user_data_fixed_size: false,
            user_data_size: 0,
            user_data_size_bits: 0,
            entries: Vec::new(),
        }
    }

    pub fn is_userinfo(&self) -> bool {
        self.name == USERINFO_TABLE_NAME
    }

    fn set_entry(&mut self, index: usize, entry: StringEntry) {
        if index >= self.entries.len() {
            self.entries.resize(index + 1, StringEntry::default());
        }
        self.entries[index] = entry;
    }
}

/// Player registry record decoded from the `userinfo` table's user data
/// (§3, §6). `version`/`xuid` are read big-endian per the spec's explicit
/// layout; the remaining 32-bit fields follow the original tool's
/// little-endian reads (see DESIGN.md for the byte-count reconciliation).
#[derive(Debug, Clone, Default)]
pub struct PlayerInfo {
    pub version: u64,
    pub xuid: u64,
    pub name: String,
    pub user_id: i32,
    pub guid: String,
    pub friends_id: u32,
    pub friends_name: String,
    pub fake_player: bool,
    pub is_hltv: bool,
    pub custom_files: [u32; 4],
    pub files_downloaded: u8,
    pub entity_id: i32,
}

pub fn decode_player_info(data: &[u8]) -> Result<PlayerInfo> {
    let mut r = ByteReader::new(data);

    let version = r.read_u64_be()?;
    let xuid = r.read_u64_be()?;
    let name = r.read_string(128)?;
    let user_id = r.read_i32_le()?;
    let guid = r.read_string(33)?;
    r.read_bytes(3)?; // pad

    let friends_id = r.read_u32_le()?;
    let friends_name = r.read_string(128)?;

    let fake_player = r.read_u8()? != 0;
    let is_hltv = r.read_u8()? != 0;
    r.read_bytes(2)?; // pad

    let custom_files = [
        r.read_u32_le()?,
        r.read_u32_le()?,
        r.read_u32_le()?,
        r.read_u32_le()?,
    ];
    let files_downloaded = r.read_u8()?;
    r.read_bytes(3)?; // pad

    let entity_id = r.read_i32_le()?;

    Ok(PlayerInfo {
        version,
        xuid,
        name,
        user_id,
        guid,
        friends_id,
        friends_name,
        fake_player,
        is_hltv,
        custom_files,
        files_downloaded,
        entity_id,
    })
}

/// Player registry, keyed by `user_id` with `entity_id` reverse lookup,
/// matching `ParserState`'s data model (§3).
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    by_user_id: HashMap<i32, PlayerInfo>,
    entity_to_user: HashMap<i32, i32>,
}

impl PlayerRegistry {
    pub fn get_by_user_id(&self, user_id: i32) -> Option<&PlayerInfo> {
        self.by_user_id.get(&user_id)
    }

    pub fn get_by_entity_id(&self, entity_id: i32) -> Option<&PlayerInfo> {
        self.entity_to_user
            .get(&entity_id)
            .and_then(|uid| self.by_user_id.get(uid))
    }

    /// Upserts a decoded `PlayerInfo`, overriding its `entity_id` with the
    /// string-table slot it was read from (mirrors the original's
    /// `player_info.entityID = i` override).
    pub fn upsert(&mut self, entity_id: i32, mut info: PlayerInfo) {
        info.entity_id = entity_id;
        if let Some(old_user_id) = self.entity_to_user.insert(entity_id, info.user_id) {
            if old_user_id != info.user_id {
                self.by_user_id.remove(&old_user_id);
            }
        }
        self.by_user_id.insert(info.user_id, info);
    }
}

/// `ceil(log2(max_entries))`, `0` when `max_entries <= 1`.
fn entry_bits(max_entries: u32) -> u32 {
    if max_entries <= 1 {
        return 0;
    }
    u32::BITS - (max_entries - 1).leading_zeros()
}

/// Reads one full-snapshot table body (`dump_string_table`): a positional
/// list of `{key, user_data}` rows addressed by their index, followed by
/// an optional client-side subset in the same layout.
fn read_snapshot_block(
    r: &mut BitReader,
    mut entries: Option<&mut Vec<StringEntry>>,
    is_userinfo: bool,
    players: &mut PlayerRegistry,
) -> Result<()> {
    let num_strings = r.read_bits(16)?;

    if let Some(e) = entries.as_deref_mut() {
        e.clear();
    }

    for i in 0..num_strings {
        let key = r.read_string_bits(MAX_KEY_LEN_FULL_SNAPSHOT)?;

        let user_data = if r.read_bit()? {
            let size = r.read_bits(16)? as usize;
            Some(r.read_bytes(size)?)
        } else {
            None
        };

        if is_userinfo {
            if let Some(data) = &user_data {
                let info = decode_player_info(data)?;
                players.upsert(i as i32, info);
            }
        }

        if let Some(e) = entries.as_deref_mut() {
            e.set_entry(i as usize, StringEntry { key, user_data });
        }
    }

    if r.read_bit()? {
        // Client-side subset: same layout, never stored.
        let client_strings = r.read_bits(16)?;
        for i in 0..client_strings {
            let _key = r.read_string_bits(MAX_KEY_LEN_FULL_SNAPSHOT)?;
            let user_data = if r.read_bit()? {
                let size = r.read_bits(16)? as usize;
                Some(r.read_bytes(size)?)
            } else {
                None
            };
            if is_userinfo {
                if let Some(data) = &user_data {
                    let info = decode_player_info(data)?;
                    players.upsert(i as i32, info);
                }
            }
        }
    }

    Ok(())
}

/// Parses a STRINGTABLES command payload (§4.5 full snapshot): `u8`
/// table count, then `{name[256], body}` per table. Existing tables with
/// a matching name are replaced in place; new ones are appended in
/// reading order (their position is the table id).
pub fn parse_full_snapshot(
    payload: &[u8],
    tables: &mut Vec<StringTable>,
    players: &mut PlayerRegistry,
) -> Result<()> {
    let mut r = BitReader::new(payload);
    let num_tables = r.read_bits(8)?;

    for _ in 0..num_tables {
        let name = r.read_string_bits(MAX_TABLE_NAME)?;
        // The name field occupies a fixed 256-byte frame even though
        // `read_string_bits` only consumes through the NUL; skip the rest.
        let consumed = name.len() + 1;
        if consumed < MAX_TABLE_NAME {
            r.read_bytes(MAX_TABLE_NAME - consumed)?;
        }

        let is_userinfo = name == USERINFO_TABLE_NAME;

        let idx = match tables.iter().position(|t| t.name == name) {
            Some(idx) => idx,
            None => {
                tables.push(StringTable::new(name, 0));
                tables.len() - 1
            }
        };

        let mut entries = std::mem::take(&mut tables[idx].entries);
        read_snapshot_block(&mut r, Some(&mut entries), is_userinfo, players)?;
        tables[idx].entries = entries;
    }

    Ok(())
}

/// Core delta decoder shared by `svc_CreateStringTable` and
/// `svc_UpdateStringTable` (§4.5's `parse_string_table_update`).
pub fn parse_string_table_update(
    data: &[u8],
    num_entries: i32,
    table: &mut StringTable,
    players: &mut PlayerRegistry,
) -> Result<()> {
    let mut r = BitReader::new(data);
    let bits = entry_bits(table.max_entries);

    if r.read_bit()? {
        return Err(ParseError::UnsupportedEncoding { offset: 0 });
    }

    let mut history: VecDeque<String> = VecDeque::with_capacity(HISTORY_SIZE);
    let mut last_entry: i32 = -1;

    for _ in 0..num_entries {
        let entry_index = if r.read_bit()? {
            last_entry + 1
        } else if bits == 0 {
            0
        } else {
            r.read_bits(bits)? as i32
        };

        if entry_index < 0 || entry_index as u32 >= table.max_entries {
            return Err(ParseError::inconsistent(
                r.bits_remaining(),
                format!("string table entry_index {entry_index} out of range"),
            ));
        }

        let key = if r.read_bit()? {
            if r.read_bit()? {
                let hist_index = r.read_bits(5)? as usize;
                let prefix_len = r.read_bits(5)? as usize;
                let prefix = history
                    .get(hist_index)
                    .map(|s| {
                        let end = prefix_len.min(s.len());
                        s[..end].to_string()
                    })
                    .unwrap_or_default();
                let suffix = r.read_string_bits(MAX_KEY_LEN)?;
                prefix + &suffix
            } else {
                r.read_string_bits(MAX_KEY_LEN)?
            }
        } else {
            table
                .entries
                .get(entry_index as usize)
                .map(|e| e.key.clone())
                .unwrap_or_default()
        };

        if history.len() >= HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(key.clone());

        let user_data = if r.read_bit()? {
            let bit_size = if table.user_data_fixed_size {
                table.user_data_size_bits as usize
            } else {
                (r.read_bits(14)? as usize) * 8
            };

            let bytes = bit_size / 8;
            let rem_bits = bit_size % 8;
            let mut buf = r.read_bytes(bytes)?;
            if rem_bits > 0 {
                buf.push(r.read_bits(rem_bits as u32)? as u8);
            }
            Some(buf)
        } else {
            None
        };

        if table.is_userinfo() {
            if let Some(data) = &user_data {
                let info = decode_player_info(data)?;
                players.upsert(entry_index, info);
            }
        }

        table.set_entry(entry_index as usize, StringEntry { key, user_data });
        last_entry = entry_index;
    }

    Ok(())
}

/// `svc_CreateStringTable`: appends a brand-new table (its id is its
/// index) seeded from the message's delta-encoded `string_data`.
pub fn create_table(
    msg: &protobuf::CreateStringTable,
    tables: &mut Vec<StringTable>,
    players: &mut PlayerRegistry,
) -> Result<usize> {
    let name = msg.name.clone().unwrap_or_default();
    let mut table = StringTable {
        name,
        max_entries: msg.max_entries.unwrap_or(0).max(0) as u32,
        user_data_fixed_size: msg.user_data_fixed_size.unwrap_or(false),
        user_data_size: msg.user_data_size.unwrap_or(0).max(0) as u32,
        user_data_size_bits: msg.user_data_size_bits.unwrap_or(0).max(0) as u32,
        entries: Vec::new(),
    };

    let num_entries = msg.num_entries.unwrap_or(0);
    if let Some(data) = &msg.string_data {
        parse_string_table_update(data, num_entries, &mut table, players)?;
    }

    tables.push(table);
    Ok(tables.len() - 1)
}

/// `svc_UpdateStringTable`: applies a delta against an already-created
/// table addressed by `table_id`.
pub fn update_table(
    msg: &protobuf::UpdateStringTable,
    tables: &mut [StringTable],
    players: &mut PlayerRegistry,
) -> Result<usize> {
    let table_id = msg.table_id.unwrap_or(-1);
    if table_id < 0 || table_id as usize >= tables.len() {
        return Err(ParseError::inconsistent(
            0,
            format!("update for unknown string table id {table_id}"),
        ));
    }

    let num_entries = msg.num_changed_entries.unwrap_or(0);
    if let Some(data) = &msg.string_data {
        parse_string_table_update(data, num_entries, &mut tables[table_id as usize], players)?;
    }

    Ok(table_id as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BitWriter {
        bits: Vec<bool>,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bits: Vec::new() }
        }

        fn push_bit(&mut self, b: bool) -> &mut Self {
            self.bits.push(b);
            self
        }

        fn push_bits(&mut self, value: u32, n: u32) -> &mut Self {
            for i in 0..n {
                self.bits.push((value >> i) & 1 == 1);
            }
            self
        }

        fn push_str_bits(&mut self, s: &str) -> &mut Self {
            for byte in s.bytes() {
                self.push_bits(byte as u32, 8);
            }
            self.push_bits(0, 8); // NUL terminator
            self
        }

        fn into_bytes(self) -> Vec<u8> {
            let mut bytes = vec![0u8; self.bits.len().div_ceil(8)];
            for (i, bit) in self.bits.iter().enumerate() {
                if *bit {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }
            bytes
        }
    }

    #[test]
    fn entry_bits_zero_for_single_entry_table() {
        assert_eq!(entry_bits(1), 0);
        assert_eq!(entry_bits(2), 1);
        assert_eq!(entry_bits(4), 2);
        assert_eq!(entry_bits(5), 3);
    }

    #[test]
    fn substring_decode_uses_history_prefix() {
        // Three entries against a 3-entry table: "alpha", "alphabet",
        // then a substring referencing history[1] ("alphabet") truncated
        // to 5 bytes ("alpha") plus suffix "ical" -> "alphaical".
        let mut w = BitWriter::new();
        w.push_bit(false); // no dictionary encoding
        w.push_bit(true); // entry 0 (auto-increment from -1)
        w.push_bit(true); // key present
        w.push_bit(false); // not substring
        w.push_str_bits("alpha");
        w.push_bit(false); // no user data

        w.push_bit(true); // entry 1 (auto-increment)
        w.push_bit(true);
        w.push_bit(false);
        w.push_str_bits("alphabet");
        w.push_bit(false);

        w.push_bit(true); // entry 2 (auto-increment)
        w.push_bit(true); // key present
        w.push_bit(true); // substring
        w.push_bits(1, 5); // history index 1 -> "alphabet"
        w.push_bits(5, 5); // prefix len 5 -> "alpha"
        w.push_str_bits("ical");
        w.push_bit(false);

        let data = w.into_bytes();
        let mut table = StringTable::new("generic", 3);
        let mut players = PlayerRegistry::default();
        parse_string_table_update(&data, 3, &mut table, &mut players).unwrap();

        assert_eq!(table.entries[0].key, "alpha");
        assert_eq!(table.entries[1].key, "alphabet");
        assert_eq!(table.entries[2].key, "alphaical");
    }

    #[test]
    fn unsupported_dictionary_encoding_is_rejected() {
        let mut w = BitWriter::new();
        w.push_bit(true); // encode_using_dictionaries = 1
        let data = w.into_bytes();

        let mut table = StringTable::new("generic", 4);
        let mut players = PlayerRegistry::default();
        let err = parse_string_table_update(&data, 1, &mut table, &mut players).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn out_of_range_entry_index_is_inconsistent() {
        let mut w = BitWriter::new();
        w.push_bit(false); // no dictionary encoding
        w.push_bit(false); // not auto-increment
        w.push_bits(3, 2); // entry_bits(4) = 2, value 3 -> out of [0,2)

        let data = w.into_bytes();
        let mut table = StringTable::new("generic", 2);
        table.max_entries = 2;
        let mut players = PlayerRegistry::default();
        let err = parse_string_table_update(&data, 1, &mut table, &mut players).unwrap_err();
        assert!(matches!(err, ParseError::Inconsistent { .. }));
    }

    #[test]
    fn player_info_round_trips_through_byte_layout() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&42u64.to_be_bytes()); // version
        bytes.extend_from_slice(&7u64.to_be_bytes()); // xuid
        let mut name = b"bob".to_vec();
        name.resize(128, 0);
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&5i32.to_le_bytes()); // user_id
        let mut guid = b"STEAM_0:0:123".to_vec();
        guid.resize(33, 0);
        bytes.extend_from_slice(&guid);
        bytes.extend_from_slice(&[0u8; 3]); // pad
        bytes.extend_from_slice(&0u32.to_le_bytes()); // friends_id
        bytes.extend_from_slice(&[0u8; 128]); // friends_name
        bytes.push(0); // fake_player
        bytes.push(1); // is_hltv
        bytes.extend_from_slice(&[0u8; 2]); // pad
        for _ in 0..4 {
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        bytes.push(0); // files_downloaded
        bytes.extend_from_slice(&[0u8; 3]); // pad
        bytes.extend_from_slice(&9i32.to_le_bytes()); // entity_id

        let info = decode_player_info(&bytes).unwrap();
        assert_eq!(info.version, 42);
        assert_eq!(info.xuid, 7);
        assert_eq!(info.name, "bob");
        assert_eq!(info.user_id, 5);
        assert!(info.is_hltv);
        assert_eq!(info.entity_id, 9);
    }

    #[test]
    fn player_registry_upsert_tracks_entity_reverse_lookup() {
        let mut reg = PlayerRegistry::default();
        reg.upsert(
            3,
            PlayerInfo {
                user_id: 10,
                ..Default::default()
            },
        );
        assert_eq!(reg.get_by_entity_id(3).unwrap().user_id, 10);
        assert_eq!(reg.get_by_user_id(10).unwrap().entity_id, 3);

        // Re-use of the same entity slot for a different user_id should
        // evict the stale user_id mapping.
        reg.upsert(
            3,
            PlayerInfo {
                user_id: 11,
                ..Default::default()
            },
        );
        assert!(reg.get_by_user_id(10).is_none());
        assert_eq!(reg.get_by_entity_id(3).unwrap().user_id, 11);
    }
}
