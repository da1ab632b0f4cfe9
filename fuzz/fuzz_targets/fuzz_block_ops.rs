#![no_main]
use blockstore_rs::{
    AllocatorConfig, Block, BlockAllocator, BlockDeviceBackedAllocator, Digest,
    MemoryBlockDevice, ValidatingBufferFactory,
};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
enum Op {
    Allocate,
    Release(u8),
    Put { block: u8, data: Vec<u8> },
    Reattach { index: u8, write_offset: u16 },
}

// Random allocator traffic must keep every stored object readable
fuzz_target!(|ops: Vec<Op>| {
    let config = AllocatorConfig {
        sector_size_bytes: 32,
        block_sector_count: 16,
        block_count: 4,
    };
    let device = Arc::new(MemoryBlockDevice::new(
        config.device_size_bytes().unwrap() as usize,
    ));
    let alloc =
        BlockDeviceBackedAllocator::new(device, Arc::new(ValidatingBufferFactory), &config)
            .unwrap();

    let mut blocks: Vec<(Block, Vec<(u64, Vec<u8>)>)> = Vec::new();
    for op in ops.into_iter().take(64) {
        match op {
            Op::Allocate => {
                if let Ok((block, _)) = alloc.new_block() {
                    blocks.push((block, Vec::new()));
                }
            }
            Op::Release(i) if !blocks.is_empty() => {
                let index = i as usize % blocks.len();
                blocks.swap_remove(index).0.release();
            }
            Op::Put { block, data } if !blocks.is_empty() => {
                let index = block as usize % blocks.len();
                let (block, objects) = &mut blocks[index];
                if block.has_space(data.len() as u64) {
                    let offset = block.put(data.len() as u64).write(&data[..]).unwrap();
                    objects.push((offset, data));
                }
            }
            Op::Reattach { index, write_offset } => {
                let offsets = alloc.free_offsets();
                if offsets.is_empty() {
                    continue;
                }
                let offset_sectors = offsets[index as usize % offsets.len()];
                let location = blockstore_rs::BlockLocation::new(offset_sectors * 32, 512);
                let write_offset = write_offset as u64 % 513;
                let block = alloc.new_block_at_location(&location, write_offset).unwrap();
                blocks.push((block, Vec::new()));
            }
            _ => {}
        }
        assert_eq!(alloc.free_block_count() + blocks.len(), 4);
    }

    for (block, objects) in &blocks {
        for (offset, data) in objects {
            let buffer = block.get(
                Digest::compute(data),
                *offset,
                data.len() as u64,
                Box::new(|ok| assert!(ok)),
            );
            assert_eq!(&buffer.into_bytes().unwrap(), data);
        }
    }
});
