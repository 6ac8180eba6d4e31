//! Native stack headroom for the recursive passes.
//!
//! Parsing, the policy transform, compilation and evaluation all walk the
//! syntax tree recursively. Each recursive entry point runs through
//! [`guarded`], which moves onto a fresh heap-allocated segment when the
//! current stack is close to exhausted.

/// Remaining stack below which a new segment is allocated.
const RED_ZONE: usize = 256 * 1024;

/// Size of each additional segment.
const SEGMENT: usize = 4 * 1024 * 1024;

pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        // A sizeable frame per level so the test outgrows a thread stack.
        let pad = std::hint::black_box([1u8; 512]);
        guarded(|| depth(n - 1)) + u32::from(pad[0])
    }

    #[test]
    fn test_deep_recursion_spills_onto_new_segments() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| depth(20_000))
            .unwrap();
        assert_eq!(handle.join().unwrap(), 20_000);
    }
}
