/*!
Loading compiled code into executable memory.

An [`Assembly`] is just bytes; this module owns the step that makes them
callable: copy the blob into an anonymous mapping, flip the mapping to
executable, and expose the entry point with the compiled signature
`fn(string, length) -> int`. The mapping is owned exclusively by
[`CompiledCode`] and released when it is dropped.

Loading refuses targets other than the running platform; cross-compiled
blobs are data, not code.
*/

use memmap2::{Mmap, MmapMut};

use super::{Assembly, CompileError, Target};

/// The signature of every compiled matcher: a pointer to the input bytes
/// and their length, returning 1 for accept and 0 for reject.
pub type RawMatchFn = unsafe extern "C" fn(*const u8, usize) -> i32;

/// A blob of machine code living in executable memory.
#[derive(Debug)]
pub struct CompiledCode {
    map: Mmap,
    len: usize,
    target: Target,
}

impl CompiledCode {
    /// Copy `assembly` into a fresh executable mapping.
    pub fn load(assembly: &Assembly) -> Result<CompiledCode, CompileError> {
        if Target::host() != Some(assembly.target) {
            return Err(CompileError::UnsupportedHost);
        }
        let len = assembly.bytes.len();
        let mut map = MmapMut::map_anon(len.max(1))?;
        map[..len].copy_from_slice(&assembly.bytes);
        let map = map.make_exec()?;
        Ok(CompiledCode {
            map,
            len,
            target: assembly.target,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Run the compiled matcher against `haystack`.
    pub fn matches(&self, haystack: &[u8]) -> bool {
        // SAFETY: `load` only accepts blobs compiled for the running
        // platform, the mapping is executable and outlives the call, and
        // the compiled code only reads `haystack[0..len]` behind a bounds
        // check on the length argument.
        let ret = unsafe {
            let entry: RawMatchFn = std::mem::transmute(self.map.as_ptr());
            entry(haystack.as_ptr(), haystack.len())
        };
        ret != 0
    }
}
