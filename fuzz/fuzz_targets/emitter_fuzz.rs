#![no_main]
use libfuzzer_sys::fuzz_target;
use oxivcd::vcdiff::{FileHeader, FormatFlags, InstructionIter, WindowEmitter, WindowIter};

// Drive the emitter with an arbitrary instruction script and check the
// window it writes parses back and decodes to the same target.
fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let format = FormatFlags::from_bits_truncate(data[0]);
    let dictionary: Vec<u8> = (0..=255u8).collect();

    let mut emitter = WindowEmitter::new(format);
    emitter.begin(dictionary.len());
    let mut target = Vec::new();
    for op in data[1..].chunks_exact(2) {
        let len = 1 + (op[1] as usize & 0x3F);
        match op[0] % 3 {
            0 => {
                let bytes = vec![op[1]; len];
                emitter.add(&bytes);
                target.extend_from_slice(&bytes);
            }
            1 => {
                emitter.run(op[1], len);
                target.extend(std::iter::repeat_n(op[1], len));
            }
            _ => {
                let addr = op[1] as usize % (dictionary.len() - len + 1);
                emitter.copy(addr as u64, len);
                target.extend_from_slice(&dictionary[addr..addr + len]);
            }
        }
    }
    if target.is_empty() {
        return;
    }

    let mut delta = Vec::new();
    FileHeader::for_format(format).write(&mut delta);
    emitter.finish(&target, &mut delta);

    let (_, windows) = WindowIter::new(&delta).unwrap();
    let extended = windows.is_extended();
    for window in windows {
        let window = window.unwrap();
        let total: usize = InstructionIter::new(&window.header, window.body, extended)
            .map(|inst| inst.unwrap().len())
            .sum();
        assert_eq!(total, target.len());
    }
    assert_eq!(oxivcd::engine::decode(&dictionary, &delta).unwrap(), target);
});
