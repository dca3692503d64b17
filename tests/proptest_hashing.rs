//! Property-based tests for block/global hashing.
//!
//! Uses proptest to generate random row sets and verify the hasher's
//! partitioning and ordering guarantees.
//!
//! Run with: `cargo test --test proptest_hashing`

use proptest::prelude::*;
use serde_json::{json, Value};

use entity_mirror::schema::Schema;
use entity_mirror::{ColumnDescriptor, EntityDescriptor, Record, Row, TableHasher};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Unique ids with free-text bodies and flags
fn rows_strategy() -> impl Strategy<Value = Vec<(i64, String, bool)>> {
    prop::collection::btree_map(0i64..20_000, ("[ -~]{0,24}", any::<bool>()), 0..200)
        .prop_map(|m| m.into_iter().map(|(id, (body, flag))| (id, body, flag)).collect())
}

fn schema(columns_reversed: bool) -> Schema {
    let mut columns = vec![
        ColumnDescriptor::integer("id").primary_key(),
        ColumnDescriptor::text("body"),
        ColumnDescriptor::boolean("pinned"),
    ];
    if columns_reversed {
        columns.reverse();
    }
    let descriptor = columns
        .into_iter()
        .fold(EntityDescriptor::new("notes", "/api/notes"), |d, c| d.column(c))
        .hash_fields(["id", "body", "pinned"]);
    Schema::compile(descriptor).unwrap()
}

fn to_rows(schema: &Schema, data: &[(i64, String, bool)]) -> Vec<Row> {
    data.iter()
        .map(|(id, body, pinned)| {
            let record: Record = match json!({"id": id, "body": body, "pinned": pinned}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
            schema.row_from_record(&record).unwrap()
        })
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Same rows, same hashes, regardless of insertion order
    #[test]
    fn prop_order_independent(data in rows_strategy(), seed in any::<u64>()) {
        let schema = schema(false);
        let hasher = TableHasher::new(1024);
        let rows = to_rows(&schema, &data);

        let mut shuffled = rows.clone();
        // Deterministic rotate-and-reverse; proptest shrinks the seed
        if !shuffled.is_empty() {
            let k = (seed as usize) % shuffled.len();
            shuffled.rotate_left(k);
            if seed % 2 == 0 {
                shuffled.reverse();
            }
        }

        let a = hasher.blocks(&hasher.row_hashes(&schema, &rows));
        let b = hasher.blocks(&hasher.row_hashes(&schema, &shuffled));
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hasher.global(&a), hasher.table_hash(&schema, &shuffled));
    }

    /// blockId = floor(id / B); no empty blocks; counts add up
    #[test]
    fn prop_partition_correct(data in rows_strategy(), block_size in 1i64..2048) {
        let schema = schema(false);
        let hasher = TableHasher::new(block_size);
        let rows = to_rows(&schema, &data);
        let blocks = hasher.blocks(&hasher.row_hashes(&schema, &rows));

        let mut total = 0u64;
        let mut previous: Option<i64> = None;
        for block in &blocks {
            prop_assert!(block.row_count > 0);
            prop_assert_eq!(block.min_id.div_euclid(block_size), block.block_id);
            prop_assert_eq!(block.max_id.div_euclid(block_size), block.block_id);
            let (start, end) = hasher.block_range(block.block_id);
            prop_assert!(start <= block.min_id && block.max_id <= end);
            if let Some(prev) = previous {
                prop_assert!(prev < block.block_id);
            }
            previous = Some(block.block_id);
            total += block.row_count;
        }
        prop_assert_eq!(total as usize, rows.len());
        prop_assert_eq!(hasher.global(&blocks).row_count as usize, rows.len());

        for row in &rows {
            let id = hasher.block_id(row.id);
            prop_assert_eq!(id, row.id.div_euclid(block_size));
            prop_assert!(blocks.iter().any(|b| b.block_id == id));
        }
    }

    /// Repeated hashing and column storage order do not change row hashes
    #[test]
    fn prop_row_hash_deterministic(data in rows_strategy()) {
        let hasher = TableHasher::new(1024);
        let declared = schema(false);
        let reversed = schema(true);

        let first = hasher.row_hashes(&declared, &to_rows(&declared, &data));
        let again = hasher.row_hashes(&declared, &to_rows(&declared, &data));
        let other_layout = hasher.row_hashes(&reversed, &to_rows(&reversed, &data));

        prop_assert_eq!(&first, &again);
        prop_assert_eq!(&first, &other_layout);
    }

    /// Changing one row changes exactly its block
    #[test]
    fn prop_single_edit_isolated(data in rows_strategy(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!data.is_empty());
        let schema = schema(false);
        let hasher = TableHasher::new(1024);

        let mut edited = data.clone();
        let target = pick.index(edited.len());
        edited[target].1.push('!');

        let before = hasher.blocks(&hasher.row_hashes(&schema, &to_rows(&schema, &data)));
        let after = hasher.blocks(&hasher.row_hashes(&schema, &to_rows(&schema, &edited)));
        let changed_block = hasher.block_id(edited[target].0);

        prop_assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            prop_assert_eq!(b.block_id, a.block_id);
            prop_assert_eq!(b.block_hash == a.block_hash, b.block_id != changed_block);
        }
    }
}

#[test]
fn empty_table_hashes_empty_string() {
    let schema = schema(false);
    let hasher = TableHasher::new(1024);
    let global = hasher.table_hash(&schema, &[]);
    assert_eq!(global.row_count, 0);
    assert_eq!(global.global_hash, entity_mirror::merkle::digest(""));
}
