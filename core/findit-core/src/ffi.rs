use crate::crawler::{index_path, CrawlOutcome};
use crate::mounts::{
    get_stats, list_mount_points, register_mount_point, remove_mount_point,
    set_mount_point_enabled,
};
use crate::probe::{detect_filesystem, UNKNOWN_FILESYSTEM};
use crate::query::{search, FileTypeFilter, SearchQuery, SearchTarget};
use crate::session::Session;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

pub type FIProgressCallback = Option<extern "C" fn(count: c_int, path: *const c_char)>;

pub const FI_CRAWL_COMPLETED: c_int = 0;
pub const FI_CRAWL_CANCELLED: c_int = 1;
pub const FI_CRAWL_FAILED: c_int = 2;

#[repr(C)]
pub struct FIHit {
    pub path: *mut c_char,
    pub filename: *mut c_char,
    pub size: i64,
    pub modified: i64,
    pub is_directory: bool,
    pub filesystem_type: *mut c_char,
}

#[repr(C)]
pub struct FIResults {
    pub hits: *mut FIHit,
    pub count: c_int,
}

#[repr(C)]
pub struct FIMountPoints {
    pub paths: *mut *mut c_char,
    pub filesystem_types: *mut *mut c_char,
    pub last_indexed: *mut i64,
    pub enabled: *mut c_int,
    pub count: c_int,
}

#[no_mangle]
pub extern "C" fn fi_create_session(store_path: *const c_char) -> *mut Session {
    let Some(path_str) = to_string(store_path) else {
        tracing::error!(target: "ffi", "fi_create_session called with null path");
        return ptr::null_mut();
    };

    match Session::create(&path_str) {
        Ok(session) => Box::into_raw(Box::new(session)),
        Err(err) => {
            tracing::error!(target: "ffi", "create_session failed: {err}");
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "C" fn fi_destroy_session(handle: *mut Session) {
    if handle.is_null() {
        return;
    }
    let session = unsafe { Box::from_raw(handle) };
    if let Err(err) = session.close() {
        tracing::warn!(target: "ffi", "close failed: {err}");
    }
}

#[no_mangle]
pub extern "C" fn fi_set_cancellation(handle: *const Session, flag: bool) {
    if let Some(session) = unsafe { handle.as_ref() } {
        session.set_cancellation(flag);
    }
}

/// Caller releases the returned string with [`fi_free_string`].
#[no_mangle]
pub extern "C" fn fi_detect_filesystem(path: *const c_char) -> *mut c_char {
    let fs_type = match to_string(path) {
        Some(path) => detect_filesystem(path),
        None => UNKNOWN_FILESYSTEM.to_string(),
    };
    CString::new(fs_type)
        .or_else(|_| CString::new(UNKNOWN_FILESYSTEM))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

#[no_mangle]
pub extern "C" fn fi_free_string(value: *mut c_char) {
    if !value.is_null() {
        unsafe { drop(CString::from_raw(value)) };
    }
}

#[no_mangle]
pub extern "C" fn fi_register_mount_point(
    handle: *const Session,
    path: *const c_char,
    fs_type: *const c_char,
) -> bool {
    let (Some(session), Some(path)) = (unsafe { handle.as_ref() }, to_string(path)) else {
        tracing::error!(target: "ffi", "fi_register_mount_point received invalid arguments");
        return false;
    };
    let fs_type = to_string(fs_type).unwrap_or_default();

    match register_mount_point(session, &path, &fs_type) {
        Ok(registered) => registered,
        Err(err) => {
            tracing::error!(target: "ffi", "register_mount_point failed: {err}");
            false
        }
    }
}

#[no_mangle]
pub extern "C" fn fi_remove_mount_point(handle: *const Session, path: *const c_char) -> bool {
    let (Some(session), Some(path)) = (unsafe { handle.as_ref() }, to_string(path)) else {
        tracing::error!(target: "ffi", "fi_remove_mount_point received invalid arguments");
        return false;
    };

    remove_mount_point(session, &path).unwrap_or_else(|err| {
        tracing::error!(target: "ffi", "remove_mount_point failed: {err}");
        false
    })
}

#[no_mangle]
pub extern "C" fn fi_set_mount_point_enabled(
    handle: *const Session,
    path: *const c_char,
    enabled: bool,
) -> bool {
    let (Some(session), Some(path)) = (unsafe { handle.as_ref() }, to_string(path)) else {
        tracing::error!(target: "ffi", "fi_set_mount_point_enabled received invalid arguments");
        return false;
    };

    set_mount_point_enabled(session, &path, enabled).unwrap_or_else(|err| {
        tracing::error!(target: "ffi", "set_mount_point_enabled failed: {err}");
        false
    })
}

/// Number of files indexed; 0 when the crawl failed.
#[no_mangle]
pub extern "C" fn fi_index_path(
    handle: *const Session,
    root: *const c_char,
    on_progress: FIProgressCallback,
) -> c_int {
    fi_index_path_ex(handle, root, on_progress, ptr::null_mut())
}

/// As [`fi_index_path`], also writing one of the `FI_CRAWL_*` codes to `status`
/// when it is non-null.
#[no_mangle]
pub extern "C" fn fi_index_path_ex(
    handle: *const Session,
    root: *const c_char,
    on_progress: FIProgressCallback,
    status: *mut c_int,
) -> c_int {
    let set_status = |code: c_int| {
        if let Some(status) = unsafe { status.as_mut() } {
            *status = code;
        }
    };

    let (Some(session), Some(root)) = (unsafe { handle.as_ref() }, to_string(root)) else {
        tracing::error!(target: "ffi", "fi_index_path received invalid arguments");
        set_status(FI_CRAWL_FAILED);
        return 0;
    };

    let outcome = index_path(session, &root, |count, path| {
        if let Some(callback) = on_progress {
            let path = CString::new(path).unwrap_or_default();
            callback(clamp_count(count), path.as_ptr());
        }
    });

    let code = match &outcome {
        CrawlOutcome::Completed { .. } => FI_CRAWL_COMPLETED,
        CrawlOutcome::Cancelled { .. } => FI_CRAWL_CANCELLED,
        CrawlOutcome::Failed { error } => {
            tracing::error!(target: "ffi", "index_path failed: {error}");
            FI_CRAWL_FAILED
        }
    };
    set_status(code);
    clamp_count(outcome.indexed_count())
}

/// Fills `results` and returns true on success. On failure `results` is left
/// empty. Release with [`fi_free_search_results`].
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn fi_search(
    handle: *const Session,
    query: *const c_char,
    match_case: bool,
    regex_mode: bool,
    search_path: bool,
    file_type: *const c_char,
    max_results: c_int,
    results: *mut FIResults,
) -> bool {
    let Some(out) = (unsafe { results.as_mut() }) else {
        tracing::error!(target: "ffi", "fi_search received null results pointer");
        return false;
    };
    out.hits = ptr::null_mut();
    out.count = 0;

    let Some(session) = (unsafe { handle.as_ref() }) else {
        tracing::error!(target: "ffi", "fi_search received null session");
        return false;
    };

    let search_query = SearchQuery {
        term: to_string(query).unwrap_or_default(),
        match_case,
        regex: regex_mode,
        target: if search_path {
            SearchTarget::Path
        } else {
            SearchTarget::Name
        },
        file_type: FileTypeFilter::from_label(&to_string(file_type).unwrap_or_default()),
        limit: max_results.max(0) as usize,
    };

    let hits = match search(session, &search_query) {
        Ok(hits) => hits,
        Err(err) => {
            tracing::error!(target: "ffi", "search failed: {err}");
            return false;
        }
    };

    let mut ffi_hits = Vec::with_capacity(hits.len());
    for hit in hits {
        match (
            CString::new(hit.path),
            CString::new(hit.filename),
            CString::new(hit.filesystem_type),
        ) {
            (Ok(path), Ok(filename), Ok(fs_type)) => ffi_hits.push(FIHit {
                path: path.into_raw(),
                filename: filename.into_raw(),
                size: hit.size,
                modified: hit.modified,
                is_directory: hit.is_directory,
                filesystem_type: fs_type.into_raw(),
            }),
            _ => {
                tracing::warn!(target: "ffi", "encountered string with interior NUL; skipping hit");
            }
        }
    }

    let (hits, count) = into_raw_slice(ffi_hits);
    out.hits = hits;
    out.count = count;
    true
}

#[no_mangle]
pub extern "C" fn fi_free_search_results(results: *mut FIResults) {
    let Some(results_ref) = (unsafe { results.as_mut() }) else {
        return;
    };

    let hits_ptr = results_ref.hits;
    let count = results_ref.count;

    // Null out first so a second free through the same struct is a no-op
    results_ref.hits = ptr::null_mut();
    results_ref.count = 0;

    for hit in unsafe { from_raw_slice(hits_ptr, count) } {
        free_c_string(hit.path);
        free_c_string(hit.filename);
        free_c_string(hit.filesystem_type);
    }
}

#[no_mangle]
pub extern "C" fn fi_get_stats(
    handle: *const Session,
    file_count: *mut i64,
    dir_count: *mut i64,
    total_size: *mut i64,
) -> bool {
    let stats = match unsafe { handle.as_ref() } {
        Some(session) => get_stats(session),
        None => Err(crate::FinditError::InvalidHandle),
    };

    let (ok, stats) = match stats {
        Ok(stats) => (true, stats),
        Err(err) => {
            tracing::error!(target: "ffi", "get_stats failed: {err}");
            (false, Default::default())
        }
    };

    unsafe {
        if let Some(out) = file_count.as_mut() {
            *out = stats.file_count;
        }
        if let Some(out) = dir_count.as_mut() {
            *out = stats.dir_count;
        }
        if let Some(out) = total_size.as_mut() {
            *out = stats.total_size_bytes;
        }
    }
    ok
}

/// Fills four parallel arrays in `mounts`. Release with [`fi_free_mount_points`].
#[no_mangle]
pub extern "C" fn fi_list_mount_points(handle: *const Session, mounts: *mut FIMountPoints) -> bool {
    let Some(out) = (unsafe { mounts.as_mut() }) else {
        tracing::error!(target: "ffi", "fi_list_mount_points received null output pointer");
        return false;
    };
    *out = FIMountPoints::empty();

    let Some(session) = (unsafe { handle.as_ref() }) else {
        tracing::error!(target: "ffi", "fi_list_mount_points received null session");
        return false;
    };

    let records = match list_mount_points(session) {
        Ok(records) => records,
        Err(err) => {
            tracing::error!(target: "ffi", "list_mount_points failed: {err}");
            return false;
        }
    };

    let mut paths = Vec::with_capacity(records.len());
    let mut fs_types = Vec::with_capacity(records.len());
    let mut last_indexed = Vec::with_capacity(records.len());
    let mut enabled = Vec::with_capacity(records.len());

    for record in records {
        match (CString::new(record.path), CString::new(record.filesystem_type)) {
            (Ok(path), Ok(fs_type)) => {
                paths.push(path.into_raw());
                fs_types.push(fs_type.into_raw());
                last_indexed.push(record.last_indexed);
                enabled.push(c_int::from(record.enabled));
            }
            _ => {
                tracing::warn!(target: "ffi", "encountered string with interior NUL; skipping mount point");
            }
        }
    }

    let (paths, count) = into_raw_slice(paths);
    out.paths = paths;
    out.filesystem_types = into_raw_slice(fs_types).0;
    out.last_indexed = into_raw_slice(last_indexed).0;
    out.enabled = into_raw_slice(enabled).0;
    out.count = count;
    true
}

#[no_mangle]
pub extern "C" fn fi_free_mount_points(mounts: *mut FIMountPoints) {
    let Some(mounts_ref) = (unsafe { mounts.as_mut() }) else {
        return;
    };

    let taken = std::mem::replace(mounts_ref, FIMountPoints::empty());
    let count = taken.count;

    unsafe {
        for path in from_raw_slice(taken.paths, count) {
            free_c_string(path);
        }
        for fs_type in from_raw_slice(taken.filesystem_types, count) {
            free_c_string(fs_type);
        }
        drop(from_raw_slice(taken.last_indexed, count));
        drop(from_raw_slice(taken.enabled, count));
    }
}

impl FIMountPoints {
    fn empty() -> Self {
        FIMountPoints {
            paths: ptr::null_mut(),
            filesystem_types: ptr::null_mut(),
            last_indexed: ptr::null_mut(),
            enabled: ptr::null_mut(),
            count: 0,
        }
    }
}

fn into_raw_slice<T>(items: Vec<T>) -> (*mut T, c_int) {
    if items.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let count = items.len() as c_int;
    let boxed = items.into_boxed_slice();
    (Box::into_raw(boxed) as *mut T, count)
}

/// Reclaims an array produced by [`into_raw_slice`]. Null or non-positive
/// counts yield an empty vector.
unsafe fn from_raw_slice<T>(items: *mut T, count: c_int) -> Vec<T> {
    if items.is_null() || count <= 0 {
        return Vec::new();
    }
    let slice_ptr = ptr::slice_from_raw_parts_mut(items, count as usize);
    Box::from_raw(slice_ptr).into_vec()
}

fn free_c_string(value: *mut c_char) {
    if !value.is_null() {
        unsafe { drop(CString::from_raw(value)) };
    }
}

fn clamp_count(count: u64) -> c_int {
    c_int::try_from(count).unwrap_or(c_int::MAX)
}

fn to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        unsafe { Some(CStr::from_ptr(ptr).to_string_lossy().into_owned()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicI32, Ordering};
    use tempfile::tempdir;

    static PROGRESS_CALLS: AtomicI32 = AtomicI32::new(0);

    extern "C" fn count_progress(_count: c_int, path: *const c_char) {
        assert!(!path.is_null());
        PROGRESS_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn empty_results() -> FIResults {
        FIResults {
            hits: ptr::null_mut(),
            count: 0,
        }
    }

    #[test]
    fn ffi_roundtrip_search() {
        let store = tempdir().unwrap();
        let tree = tempdir().unwrap();
        fs::write(tree.path().join("hello.txt"), "hello world").unwrap();
        fs::write(tree.path().join("other.md"), "x").unwrap();

        let store_c = CString::new(store.path().join("index.db").to_str().unwrap()).unwrap();
        let handle = fi_create_session(store_c.as_ptr());
        assert!(!handle.is_null());

        let root_c = CString::new(tree.path().to_str().unwrap()).unwrap();
        let mut status: c_int = -1;
        let indexed = fi_index_path_ex(handle, root_c.as_ptr(), None, &mut status);
        assert_eq!(indexed, 2);
        assert_eq!(status, FI_CRAWL_COMPLETED);

        let query_c = CString::new("hello").unwrap();
        let type_c = CString::new("files").unwrap();
        let mut results = empty_results();
        assert!(fi_search(
            handle,
            query_c.as_ptr(),
            false,
            false,
            false,
            type_c.as_ptr(),
            10,
            &mut results,
        ));
        assert_eq!(results.count, 1);

        let hits = unsafe { std::slice::from_raw_parts(results.hits, results.count as usize) };
        let first = &hits[0];
        let hit_path = unsafe { CStr::from_ptr(first.path) }.to_str().unwrap();
        let hit_name = unsafe { CStr::from_ptr(first.filename) }.to_str().unwrap();
        assert_eq!(hit_path, tree.path().join("hello.txt").to_str().unwrap());
        assert_eq!(hit_name, "hello.txt");
        assert_eq!(first.size, 11);
        assert!(!first.is_directory);
        assert!(!first.filesystem_type.is_null());

        fi_free_search_results(&mut results);
        assert!(results.hits.is_null());
        assert_eq!(results.count, 0);
        fi_free_search_results(&mut results);

        fi_destroy_session(handle);
    }

    #[test]
    fn progress_callback_fires_per_batch() {
        let store = tempdir().unwrap();
        let tree = tempdir().unwrap();
        for i in 0..25 {
            fs::write(tree.path().join(format!("f{i}.bin")), "x").unwrap();
        }
        let settings = crate::SessionSettings {
            batch_size: 10,
            ..Default::default()
        };
        let session = Session::create_with_settings(store.path().join("index.db"), settings).unwrap();
        let handle = Box::into_raw(Box::new(session));

        let root_c = CString::new(tree.path().to_str().unwrap()).unwrap();
        PROGRESS_CALLS.store(0, Ordering::SeqCst);
        assert_eq!(fi_index_path(handle, root_c.as_ptr(), Some(count_progress)), 25);
        assert_eq!(PROGRESS_CALLS.load(Ordering::SeqCst), 2);

        fi_destroy_session(handle);
    }

    #[test]
    fn invalid_regex_reports_failure_with_empty_results() {
        let store = tempdir().unwrap();
        let store_c = CString::new(store.path().join("index.db").to_str().unwrap()).unwrap();
        let handle = fi_create_session(store_c.as_ptr());

        let query_c = CString::new("(").unwrap();
        let mut results = empty_results();
        assert!(!fi_search(
            handle,
            query_c.as_ptr(),
            false,
            true,
            false,
            ptr::null(),
            10,
            &mut results,
        ));
        assert!(results.hits.is_null());
        assert_eq!(results.count, 0);

        fi_destroy_session(handle);
    }

    #[test]
    fn mount_points_and_stats_roundtrip() {
        let store = tempdir().unwrap();
        let store_c = CString::new(store.path().join("index.db").to_str().unwrap()).unwrap();
        let handle = fi_create_session(store_c.as_ptr());

        let path_c = CString::new("/tmp/data").unwrap();
        let type_c = CString::new("ext4").unwrap();
        assert!(fi_register_mount_point(handle, path_c.as_ptr(), type_c.as_ptr()));

        let mut mounts = FIMountPoints::empty();
        assert!(fi_list_mount_points(handle, &mut mounts));
        assert_eq!(mounts.count, 1);
        unsafe {
            assert_eq!(CStr::from_ptr(*mounts.paths).to_str().unwrap(), "/tmp/data");
            assert_eq!(CStr::from_ptr(*mounts.filesystem_types).to_str().unwrap(), "ext4");
            assert_eq!(*mounts.last_indexed, 0);
            assert_eq!(*mounts.enabled, 1);
        }
        fi_free_mount_points(&mut mounts);
        assert!(mounts.paths.is_null());
        fi_free_mount_points(&mut mounts);

        assert!(fi_set_mount_point_enabled(handle, path_c.as_ptr(), false));
        assert!(fi_list_mount_points(handle, &mut mounts));
        assert_eq!(unsafe { *mounts.enabled }, 0);
        fi_free_mount_points(&mut mounts);

        assert!(fi_remove_mount_point(handle, path_c.as_ptr()));
        assert!(fi_list_mount_points(handle, &mut mounts));
        assert_eq!(mounts.count, 0);
        assert!(mounts.paths.is_null());
        fi_free_mount_points(&mut mounts);

        let (mut files, mut dirs, mut size) = (-1i64, -1i64, -1i64);
        assert!(fi_get_stats(handle, &mut files, &mut dirs, &mut size));
        assert_eq!((files, dirs, size), (0, 0, 0));

        fi_destroy_session(handle);
    }

    #[test]
    fn null_handles_are_rejected_not_fatal() {
        let query_c = CString::new("x").unwrap();
        let mut results = empty_results();
        assert!(!fi_search(
            ptr::null(),
            query_c.as_ptr(),
            false,
            false,
            false,
            ptr::null(),
            10,
            &mut results,
        ));

        let (mut files, mut dirs, mut size) = (7i64, 7i64, 7i64);
        assert!(!fi_get_stats(ptr::null(), &mut files, &mut dirs, &mut size));
        assert_eq!((files, dirs, size), (0, 0, 0));

        let mut status: c_int = -1;
        assert_eq!(fi_index_path_ex(ptr::null(), ptr::null(), None, &mut status), 0);
        assert_eq!(status, FI_CRAWL_FAILED);

        assert!(fi_create_session(ptr::null()).is_null());
        fi_destroy_session(ptr::null_mut());
        fi_set_cancellation(ptr::null(), true);
        fi_free_search_results(ptr::null_mut());
        fi_free_mount_points(ptr::null_mut());
        fi_free_string(ptr::null_mut());
    }

    #[test]
    fn detect_filesystem_returns_owned_string() {
        let missing = CString::new("/definitely/not/here").unwrap();
        let fs_type = fi_detect_filesystem(missing.as_ptr());
        assert_eq!(unsafe { CStr::from_ptr(fs_type) }.to_str().unwrap(), "unknown");
        fi_free_string(fs_type);
    }
}
