use std::collections::HashSet;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use sandvox::core::types::IVec3;
use sandvox::core::WorldSettings;
use sandvox::generation::{MapGenerator, MapgenV6};
use sandvox::lighting::bulk::repair_block_light;
use sandvox::map::{LogicMap, Map, MapAccess, MemoryDatabase};
use sandvox::voxel::{MapNode, NodeDefManager, CONTENT_AIR};

/// Air above stone at y = 0, `radius` blocks around the origin
fn terrain_map(radius: i32) -> Map {
    let defs = Arc::new(NodeDefManager::with_default_content());
    let stone = defs.get_id("default:stone").unwrap_or(CONTENT_AIR);
    let mut map = Map::new(defs);
    for z in -radius..=radius {
        for y in -radius..=radius {
            for x in -radius..=radius {
                let block = map.create_block(IVec3::new(x, y, z));
                block.fill(MapNode::new(if y < 0 { stone } else { CONTENT_AIR }));
                block.set_generated(true);
            }
        }
    }
    map
}

fn bench_node_placement(c: &mut Criterion) {
    let mut map = terrain_map(2);
    let stone = map.node_defs().get_id("default:stone").unwrap_or(CONTENT_AIR);
    let p = IVec3::new(3, 5, 3);

    c.bench_function("place_and_remove_node", |b| {
        b.iter(|| {
            let mut modified = HashSet::new();
            map.add_node_and_update(black_box(p), MapNode::new(stone), &mut modified, true).ok();
            map.remove_node_and_update(black_box(p), &mut modified).ok();
            modified.len()
        });
    });
}

fn bench_repair_block(c: &mut Criterion) {
    let mut map = terrain_map(1);

    c.bench_function("repair_block_light", |b| {
        b.iter(|| {
            let mut modified = HashSet::new();
            repair_block_light(&mut map, black_box(IVec3::ZERO), &mut modified);
            modified.len()
        });
    });
}

fn bench_v6_chunk(c: &mut Criterion) {
    let settings = WorldSettings { chunksize: 2, seed: 1234, ..Default::default() };
    let defs = Arc::new(NodeDefManager::with_default_content());
    let mut map = LogicMap::new(defs, Box::new(MemoryDatabase::new()), &settings);
    let mut generator = MapgenV6::new(&settings);

    c.bench_function("v6_make_chunk", |b| {
        b.iter_batched(
            || {
                let data = map.init_block_make(IVec3::ZERO).unwrap();
                map.cancel_block_make(data.blockpos_min);
                data
            },
            |mut data| {
                generator.make_chunk(&mut data);
                data
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_node_placement, bench_repair_block, bench_v6_chunk);
criterion_main!(benches);
