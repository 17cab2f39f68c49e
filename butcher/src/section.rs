// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The descriptor section contract shared with test objects.
//!
//! A test object carries a contiguous array of [`FnDescriptor`] records in
//! a section named `bexec`. The linker brackets that array with the
//! synthesized symbols `__start_bexec` and `__stop_bexec`; both the
//! discovery pass and the runner resolve those two symbols and index the
//! array in between. The array is identical in every process that maps
//! the same object file, which is what makes plain integer indexes a
//! valid wire format between the harness and its runner children.

use crate::error::{Error, Result};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::Path;

/// Return code of a test callable: everything went fine.
pub const BT_RESULT_OK: c_int = 0;
/// Return code of a test callable: skip this test.
pub const BT_RESULT_IGNORE: c_int = 1;
/// Return code of a test callable: the test failed.
pub const BT_RESULT_FAIL: c_int = 2;

/// Symbol naming the first descriptor record.
pub const SECTION_START: &[u8] = b"__start_bexec\0";
/// Symbol naming the byte just past the last descriptor record.
pub const SECTION_STOP: &[u8] = b"__stop_bexec\0";

/// Signature of every embedded callable. The first argument is the
/// fixture object threaded from the previous phase (null for setup), the
/// second receives the object to thread into the next phase. Plain tests
/// ignore both.
pub type TestFn = unsafe extern "C" fn(*mut c_void, *mut *mut c_void) -> c_int;

/// One record in the `bexec` section. C ABI, four machine words.
#[repr(C)]
pub struct FnDescriptor {
    /// Test name, NUL terminated.
    pub name: *const c_char,
    /// Suite name, NUL terminated.
    pub extra: *const c_char,
    /// Low nibble is the [`FnKind`] tag.
    pub flags: usize,
    pub function: TestFn,
}

// Descriptor records are immutable link-time data.
unsafe impl Sync for FnDescriptor {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    PlainTest = 0,
    FixturedTest = 1,
    Setup = 2,
    Teardown = 3,
}

impl FnKind {
    pub fn from_flags(flags: usize) -> Option<FnKind> {
        match flags & 0xf {
            0 => Some(FnKind::PlainTest),
            1 => Some(FnKind::FixturedTest),
            2 => Some(FnKind::Setup),
            3 => Some(FnKind::Teardown),
            _ => None,
        }
    }

    /// Tags that register a test in pass one of discovery.
    pub fn is_test(self) -> bool {
        matches!(self, FnKind::PlainTest | FnKind::FixturedTest)
    }

    pub fn label(self) -> &'static str {
        match self {
            FnKind::PlainTest => "test",
            FnKind::FixturedTest => "fixtured test",
            FnKind::Setup => "setup",
            FnKind::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for FnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FnDescriptor {
    pub fn kind(&self) -> Option<FnKind> {
        FnKind::from_flags(self.flags)
    }

    /// Reads the test name out of the mapped object.
    ///
    /// # Safety
    /// `self.name` must point at a NUL-terminated string that stays mapped,
    /// which holds while the library that carries the record is loaded.
    pub unsafe fn name_string(&self) -> String {
        cstring_lossy(self.name)
    }

    /// Reads the suite name out of the mapped object.
    ///
    /// # Safety
    /// Same requirements as [`FnDescriptor::name_string`] for `self.extra`.
    pub unsafe fn extra_string(&self) -> String {
        cstring_lossy(self.extra)
    }
}

unsafe fn cstring_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// A descriptor record parsed into owned strings, safe to keep around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    /// Position of the record in the section array.
    pub index: usize,
    pub kind: FnKind,
    /// Test name.
    pub name: String,
    /// Suite name, possibly empty.
    pub suite: String,
}

/// A dlopened test object and its descriptor array.
pub struct TestObject {
    lib: libloading::os::unix::Library,
}

impl std::fmt::Debug for TestObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestObject").finish()
    }
}

impl TestObject {
    /// Opens the object with lazy binding; enough for walking descriptors.
    pub fn open_lazy(path: &Path) -> Result<Self> {
        Self::open(path, libloading::os::unix::RTLD_LAZY)
    }

    /// Opens the object with immediate symbol resolution, the way the
    /// runner wants it: an unresolvable object fails up front, not in the
    /// middle of a phase.
    pub fn open_now(path: &Path) -> Result<Self> {
        Self::open(path, libloading::os::unix::RTLD_NOW)
    }

    fn open(path: &Path, flags: c_int) -> Result<Self> {
        let lib = unsafe { libloading::os::unix::Library::open(Some(path), flags) }
            .map_err(|e| Error::LoadFailed(e.to_string()))?;
        Ok(TestObject { lib })
    }

    /// The bracketed descriptor array.
    ///
    /// Fails with [`Error::NoDescriptors`] when the object was built
    /// without any embedded tests (neither bracket symbol exists then).
    pub fn descriptors(&self) -> Result<&[FnDescriptor]> {
        let start = self.bracket(SECTION_START, "__start_bexec")?;
        let stop = self.bracket(SECTION_STOP, "__stop_bexec")?;
        let bytes = (stop as usize).saturating_sub(start as usize);
        let count = bytes / std::mem::size_of::<FnDescriptor>();
        // The brackets delimit link-time data pinned for the lifetime of
        // the loader handle; the slice borrows self, so it cannot outlive
        // the mapping.
        Ok(unsafe { std::slice::from_raw_parts(start, count) })
    }

    fn bracket(&self, symbol: &[u8], label: &'static str) -> Result<*const FnDescriptor> {
        let resolved = unsafe { self.lib.get::<*const FnDescriptor>(symbol) }
            .map_err(|_| Error::NoDescriptors(label))?;
        Ok(resolved.into_raw() as *const FnDescriptor)
    }

    /// Parses the whole section into owned entries, keeping the record
    /// indexes. Records with an unknown tag are skipped.
    pub fn entries(&self) -> Result<Vec<DescriptorEntry>> {
        let descriptors = self.descriptors()?;
        let mut entries = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            let Some(kind) = descriptor.kind() else {
                log::debug!("descriptor {index} has unknown kind, skipped");
                continue;
            };
            // The object stays mapped while `self` is alive.
            let (name, suite) =
                unsafe { (descriptor.name_string(), descriptor.extra_string()) };
            entries.push(DescriptorEntry {
                index,
                kind,
                name,
                suite,
            });
        }
        Ok(entries)
    }

    /// Resolves a callable by descriptor index, validating the range.
    pub fn function_at(&self, index: usize) -> Result<TestFn> {
        let descriptors = self.descriptors()?;
        let descriptor = descriptors.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "descriptor index {index} out of range (0..{})",
                descriptors.len()
            ))
        })?;
        Ok(descriptor.function)
    }

    /// Gives up ownership without unloading the library.
    pub fn leak(self) {
        std::mem::forget(self.lib);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_lives_in_low_nibble() {
        assert_eq!(FnKind::from_flags(0), Some(FnKind::PlainTest));
        assert_eq!(FnKind::from_flags(1), Some(FnKind::FixturedTest));
        assert_eq!(FnKind::from_flags(2), Some(FnKind::Setup));
        assert_eq!(FnKind::from_flags(3), Some(FnKind::Teardown));
        assert_eq!(FnKind::from_flags(0x10 | 3), Some(FnKind::Teardown));
        assert_eq!(FnKind::from_flags(7), None);
    }

    #[test]
    fn descriptor_is_four_machine_words() {
        assert_eq!(
            std::mem::size_of::<FnDescriptor>(),
            4 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn missing_object_reports_loader_error() {
        let err = TestObject::open_lazy(Path::new("/nonexistent/libnope.so")).unwrap_err();
        assert!(matches!(err, Error::LoadFailed(_)));
    }
}
