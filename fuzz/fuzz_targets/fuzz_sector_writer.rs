#![no_main]
use blockstore_rs::{MemoryBlockDevice, SectorWriter};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Debug, Arbitrary)]
struct Input {
    sector_size: u8,
    offset_sectors: u8,
    chunks: Vec<Vec<u8>>,
}

// Any sequence of appends must produce aligned writes and no reads
fuzz_target!(|input: Input| {
    let sector_size = input.sector_size as usize + 1;
    let total: usize = input.chunks.iter().map(Vec::len).sum();
    let start = input.offset_sectors as u64 * sector_size as u64;
    let device = MemoryBlockDevice::filled(start as usize + total + sector_size, 0xAA);

    let mut writer = SectorWriter::new(&device, sector_size, input.offset_sectors as u64);
    for chunk in &input.chunks {
        writer.append(chunk).unwrap();
    }
    let end_sectors = writer.finish().unwrap();

    assert_eq!(
        end_sectors,
        input.offset_sectors as u64 + total.div_ceil(sector_size) as u64
    );
    assert_eq!(device.stats().reads, 0);
    for (offset, len) in device.write_log() {
        assert_eq!(offset % sector_size as u64, 0);
        assert_eq!(len % sector_size, 0);
    }

    let expected: Vec<u8> = input.chunks.concat();
    assert_eq!(device.contents(start, total), expected);
    let end_bytes = end_sectors as usize * sector_size;
    let padding = device.contents(start + total as u64, end_bytes - start as usize - total);
    assert!(padding.iter().all(|&b| b == 0));
});
