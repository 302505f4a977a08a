//! One-shot layout of argv and environ into the reserved guest region.
//!
//! The Go runtime reads its arguments and environment straight out of
//! linear memory: NUL-terminated strings padded to 8 bytes, followed by an
//! 8-byte-aligned pointer array `[argv..., 0, envp..., 0]`, all inside
//! `[4096, 12288)`. The region is written once, before `run` is invoked.

use wasmer::MemoryView;

use crate::errors::{GoJsError, GoJsStateCreationError};
use crate::mem;

/// First byte of the reserved region.
pub(crate) const END_OF_PAGE_ZERO: u32 = 4096;
/// First byte past the reserved region (the guest's own data starts here).
pub(crate) const WASM_MIN_DATA_ADDR: u32 = END_OF_PAGE_ZERO + 8192;

/// The computed layout: bytes to place at [`END_OF_PAGE_ZERO`], plus the
/// `run(argc, argv)` parameters.
#[derive(Debug)]
pub(crate) struct ArgsLayout {
    pub(crate) region: Vec<u8>,
    pub(crate) argc: u32,
    pub(crate) argv: u32,
}

/// Lays out `args` then `envs` (`key=value`, insertion order preserved).
pub(crate) fn layout(
    args: &[String],
    envs: &[(String, String)],
) -> Result<ArgsLayout, GoJsStateCreationError> {
    let mut region = Vec::new();
    let mut string_ptrs = Vec::with_capacity(args.len() + envs.len());

    let mut push_string = |region: &mut Vec<u8>, s: &str| {
        string_ptrs.push(END_OF_PAGE_ZERO + region.len() as u32);
        region.extend_from_slice(s.as_bytes());
        region.push(0);
        while region.len() % 8 != 0 {
            region.push(0);
        }
    };

    for arg in args {
        push_string(&mut region, arg);
    }
    for (key, value) in envs {
        push_string(&mut region, &format!("{key}={value}"));
    }

    let argv = END_OF_PAGE_ZERO + region.len() as u32;
    let (argv_ptrs, envp_ptrs) = string_ptrs.split_at(args.len());
    for ptr in argv_ptrs {
        region.extend_from_slice(&(*ptr as u64).to_le_bytes());
    }
    region.extend_from_slice(&0u64.to_le_bytes());
    for ptr in envp_ptrs {
        region.extend_from_slice(&(*ptr as u64).to_le_bytes());
    }
    region.extend_from_slice(&0u64.to_le_bytes());

    let need = region.len();
    let max = (WASM_MIN_DATA_ADDR - END_OF_PAGE_ZERO) as usize;
    if need > max {
        return Err(GoJsStateCreationError::EnvironOverflow { need, max });
    }
    Ok(ArgsLayout {
        region,
        argc: args.len() as u32,
        argv,
    })
}

/// Writes the layout into guest memory and returns `(argc, argv)`.
pub(crate) fn write(
    view: &MemoryView,
    args: &[String],
    envs: &[(String, String)],
) -> Result<(u32, u32), GoJsError> {
    let layout = layout(args, envs)
        .map_err(|err| GoJsError::ArgsTooLarge(match err {
            GoJsStateCreationError::EnvironOverflow { need, .. } => need,
        }))?;
    mem::write_bytes(view, END_OF_PAGE_ZERO as u64, &layout.region)?;
    Ok((layout.argc, layout.argv))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn read_u64_at(region: &[u8], addr: u32) -> u64 {
        let off = (addr - END_OF_PAGE_ZERO) as usize;
        u64::from_le_bytes(region[off..off + 8].try_into().unwrap())
    }

    fn read_cstr_at(region: &[u8], addr: u32) -> String {
        let off = (addr - END_OF_PAGE_ZERO) as usize;
        let end = region[off..].iter().position(|b| *b == 0).unwrap() + off;
        String::from_utf8(region[off..end].to_vec()).unwrap()
    }

    #[test]
    fn argv_and_environ_layout() {
        let layout = layout(
            &strings(&["test", "argsenv"]),
            &pairs(&[("c", "d"), ("a", "b")]),
        )
        .unwrap();

        assert_eq!(layout.argc, 2);
        assert_eq!(layout.argv % 8, 0);

        // argv pointers, NUL, envp pointers, NUL.
        let argv0 = read_u64_at(&layout.region, layout.argv) as u32;
        let argv1 = read_u64_at(&layout.region, layout.argv + 8) as u32;
        assert_eq!(read_cstr_at(&layout.region, argv0), "test");
        assert_eq!(read_cstr_at(&layout.region, argv1), "argsenv");
        assert_eq!(read_u64_at(&layout.region, layout.argv + 16), 0);

        // Environ keeps insertion order.
        let envp0 = read_u64_at(&layout.region, layout.argv + 24) as u32;
        let envp1 = read_u64_at(&layout.region, layout.argv + 32) as u32;
        assert_eq!(read_cstr_at(&layout.region, envp0), "c=d");
        assert_eq!(read_cstr_at(&layout.region, envp1), "a=b");
        assert_eq!(read_u64_at(&layout.region, layout.argv + 40), 0);
    }

    #[test]
    fn strings_are_nul_terminated_and_padded() {
        let layout = layout(&strings(&["x"]), &[]).unwrap();
        // "x\0" padded to 8, then [ptr, 0, 0].
        assert_eq!(&layout.region[..8], b"x\0\0\0\0\0\0\0");
        assert_eq!(layout.argv, END_OF_PAGE_ZERO + 8);
        assert_eq!(layout.region.len(), 8 + 24);
    }

    #[test]
    fn overflow_is_rejected() {
        let big = "a".repeat(9000);
        match layout(&[big], &[]) {
            Err(GoJsStateCreationError::EnvironOverflow { need, max }) => {
                assert!(need > max);
                assert_eq!(max, 8192);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn whole_region_fits_the_reservation() {
        let layout = layout(
            &strings(&["gojs", "with", "args"]),
            &pairs(&[("HOME", "/"), ("TERM", "xterm")]),
        )
        .unwrap();
        assert!(layout.region.len() <= (WASM_MIN_DATA_ADDR - END_OF_PAGE_ZERO) as usize);
    }
}
