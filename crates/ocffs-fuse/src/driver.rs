//! The FUSE operation layer: a `PathFilesystem` that overlays placeholder
//! metadata onto a physical directory tree and turns one synthetic xattr
//! into a virtual/physical state machine.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::num::NonZeroU32;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fuse3::path::prelude::*;
use fuse3::{Errno, FileType, MountOptions};
use futures_util::stream;
use tokio::fs::OpenOptions;
use tracing::{debug, info};

use ocffs_db::PlaceholderDb;

use crate::classify::is_transparent;
use crate::io::{read_stub, RealTable, SyntheticTable};
use crate::overlay::{rel_to_root, stat_to_attr, virtual_attr};
use crate::resolve::{resolve, Mode, Resolved};
use crate::transition::{physical_to_virtual, virtual_to_physical};
use crate::xattr::{desired_state, state_value, with_synthetic_name, DesiredState, VIRTUAL_XATTR};

const ATTR_TTL: Duration = Duration::from_secs(1);

/// Everything the operation layer needs, assembled once at mount time.
pub struct MountContext {
    pub root_dir: PathBuf,
    pub db: PlaceholderDb,
    pub client_pid: u32,
    pub client_uid: u32,
    pub virtual_suffix: String,
    pub control_socket_path: PathBuf,
    pub read_block_size: u32,
    pub control_socket_timeout: Duration,
}

/// The FUSE filesystem driver.
pub struct OcffsFs {
    ctx: MountContext,
    synthetic_fds: SyntheticTable,
    real_fds: RealTable,
}

impl OcffsFs {
    pub fn new(ctx: MountContext) -> Self {
        Self { ctx, synthetic_fds: SyntheticTable::new(), real_fds: RealTable::new() }
    }

    fn resolve(&self, path: &OsStr, mode: Mode) -> Resolved {
        resolve(&self.ctx.root_dir, Path::new(path), &self.ctx.virtual_suffix, mode)
    }

    fn resolve_child(&self, parent: &OsStr, name: &OsStr, mode: Mode) -> Resolved {
        let child = join(parent, name);
        resolve(&self.ctx.root_dir, &child, &self.ctx.virtual_suffix, mode)
    }

    async fn build_attr(&self, resolved: &Resolved, transparent: bool) -> std::io::Result<FileAttr> {
        let meta = tokio::fs::symlink_metadata(resolved.path()).await?;
        if resolved.is_virtual() {
            let rel = rel_to_root(&self.ctx.root_dir, resolved.path());
            let rel = rel.strip_suffix(self.ctx.virtual_suffix.as_str()).unwrap_or(rel);
            Ok(virtual_attr(&self.ctx.db, &meta, rel, transparent))
        } else {
            Ok(stat_to_attr(&meta))
        }
    }

    fn user_visible_name(&self, name: &OsStr, transparent: bool) -> std::ffi::OsString {
        let bytes = name.as_bytes();
        if !transparent {
            if let Some(stripped) = bytes.strip_suffix(self.ctx.virtual_suffix.as_bytes()) {
                return OsStr::from_bytes(stripped).to_os_string();
            }
        }
        name.to_os_string()
    }
}

fn join(parent: &OsStr, name: &OsStr) -> PathBuf {
    let parent_str = parent.to_str().unwrap_or("/");
    let name_str = name.to_str().unwrap_or("");
    if parent_str == "/" {
        PathBuf::from(format!("/{name_str}"))
    } else {
        PathBuf::from(format!("{}/{}", parent_str.trim_end_matches('/'), name_str))
    }
}

fn enoent() -> Errno {
    Errno::from(libc::ENOENT)
}

fn eremote() -> Errno {
    Errno::from(libc::EREMOTE)
}

impl PathFilesystem for OcffsFs {
    async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
        debug!(root = %self.ctx.root_dir.display(), "ocffs init");
        Ok(ReplyInit { max_write: NonZeroU32::new(128 * 1024).unwrap() })
    }

    async fn destroy(&self, _req: Request) {
        info!("ocffs unmounted");
    }

    async fn lookup(&self, req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<ReplyEntry> {
        let transparent = is_transparent(&req, self.ctx.client_pid);
        let name_str = name.to_str().unwrap_or("");

        // A non-transparent caller only ever sees suffix-stripped names, so
        // a lookup by that name must resolve through auto mode on the
        // stripped path; a transparent caller may address the placeholder
        // file by its on-disk (suffixed) name directly.
        let resolved = if !transparent && name_str.ends_with(self.ctx.virtual_suffix.as_str()) {
            return Err(enoent());
        } else {
            self.resolve_child(parent, name, Mode::Auto)
        };

        match resolved {
            Resolved::Absent(_) => Err(enoent()),
            resolved => {
                let attr = self
                    .build_attr(&resolved, transparent)
                    .await
                    .map_err(|_| enoent())?;
                Ok(ReplyEntry { ttl: ATTR_TTL, attr })
            }
        }
    }

    async fn getattr(
        &self,
        req: Request,
        path: Option<&OsStr>,
        _fh: Option<u64>,
        _flags: u32,
    ) -> fuse3::Result<ReplyAttr> {
        let path = path.ok_or_else(enoent)?;
        let transparent = is_transparent(&req, self.ctx.client_pid);
        let resolved = self.resolve(path, Mode::Auto);
        if matches!(resolved, Resolved::Absent(_)) {
            return Err(enoent());
        }
        let attr = self.build_attr(&resolved, transparent).await.map_err(Errno::from)?;
        Ok(ReplyAttr { ttl: ATTR_TTL, attr })
    }

    async fn setattr(
        &self,
        req: Request,
        path: Option<&OsStr>,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> fuse3::Result<ReplyAttr> {
        let path = path.ok_or_else(enoent)?;
        let resolved = self.resolve(path, Mode::Auto);
        let target = resolved.path().to_path_buf();

        if let Some(mode) = set_attr.mode {
            tokio::fs::set_permissions(&target, std::os::unix::fs::PermissionsExt::from_mode(mode))
                .await
                .map_err(Errno::from)?;
        }
        if let Some(size) = set_attr.size {
            let file = OpenOptions::new().write(true).open(&target).await.map_err(Errno::from)?;
            file.set_len(size).await.map_err(Errno::from)?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            chown_path(&target, set_attr.uid, set_attr.gid).map_err(Errno::from)?;
        }
        if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            utimens_path(&target, set_attr.atime, set_attr.mtime).map_err(Errno::from)?;
        }

        let transparent = is_transparent(&req, self.ctx.client_pid);
        let attr = self.build_attr(&resolved, transparent).await.map_err(Errno::from)?;
        Ok(ReplyAttr { ttl: ATTR_TTL, attr })
    }

    async fn readlink(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyData> {
        let resolved = self.resolve(path, Mode::Auto);
        if resolved.is_virtual() {
            return Err(eremote());
        }
        let target = tokio::fs::read_link(resolved.path()).await.map_err(Errno::from)?;
        Ok(ReplyData { data: bytes::Bytes::copy_from_slice(target.as_os_str().as_bytes()) })
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        link_path: &OsStr,
    ) -> fuse3::Result<ReplyEntry> {
        let resolved = self.resolve_child(parent, name, Mode::ForcePhysical);
        tokio::fs::symlink(link_path, resolved.path()).await.map_err(Errno::from)?;
        let attr = self.build_attr(&resolved, true).await.map_err(Errno::from)?;
        Ok(ReplyEntry { ttl: ATTR_TTL, attr })
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> fuse3::Result<ReplyEntry> {
        let resolved = self.resolve_child(parent, name, Mode::ForcePhysical);
        let path = resolved.path();
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| enoent())?;
        let rc = unsafe { libc::mknod(c_path.as_ptr(), mode, rdev as libc::dev_t) };
        if rc != 0 {
            return Err(Errno::from(std::io::Error::last_os_error()));
        }
        let attr = self.build_attr(&resolved, true).await.map_err(Errno::from)?;
        Ok(ReplyEntry { ttl: ATTR_TTL, attr })
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        _umask: u32,
    ) -> fuse3::Result<ReplyEntry> {
        let resolved = self.resolve_child(parent, name, Mode::ForcePhysical);
        tokio::fs::create_dir(resolved.path()).await.map_err(Errno::from)?;
        tokio::fs::set_permissions(resolved.path(), std::os::unix::fs::PermissionsExt::from_mode(mode))
            .await
            .map_err(Errno::from)?;
        let attr = self.build_attr(&resolved, true).await.map_err(Errno::from)?;
        Ok(ReplyEntry { ttl: ATTR_TTL, attr })
    }

    async fn unlink(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
        let resolved = self.resolve_child(parent, name, Mode::Auto);
        tokio::fs::remove_file(resolved.path()).await.map_err(Errno::from)?;
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
        let resolved = self.resolve_child(parent, name, Mode::ForcePhysical);
        tokio::fs::remove_dir(resolved.path()).await.map_err(Errno::from)?;
        Ok(())
    }

    async fn rename(
        &self,
        _req: Request,
        origin_parent: &OsStr,
        origin_name: &OsStr,
        parent: &OsStr,
        name: &OsStr,
    ) -> fuse3::Result<()> {
        let source = self.resolve_child(origin_parent, origin_name, Mode::Auto);
        if source.is_virtual() {
            return Err(eremote());
        }
        let dest = self.resolve_child(parent, name, Mode::ForcePhysical);
        tokio::fs::rename(source.path(), dest.path()).await.map_err(Errno::from)?;
        Ok(())
    }

    async fn link(
        &self,
        _req: Request,
        path: &OsStr,
        new_parent: &OsStr,
        new_name: &OsStr,
    ) -> fuse3::Result<ReplyEntry> {
        // The link target is force-physical-resolved, matching the original's
        // `os.link(self._oc_path(target, virt=False)[0], rpath)` — only the
        // new name's own resolved state gates the call.
        let existing = self.resolve(path, Mode::ForcePhysical);
        let new = self.resolve_child(new_parent, new_name, Mode::Auto);
        if new.is_virtual() {
            return Err(eremote());
        }
        tokio::fs::hard_link(existing.path(), new.path()).await.map_err(Errno::from)?;
        let attr = self.build_attr(&new, true).await.map_err(Errno::from)?;
        Ok(ReplyEntry { ttl: ATTR_TTL, attr })
    }

    async fn open(&self, _req: Request, path: &OsStr, flags: u32) -> fuse3::Result<ReplyOpen> {
        match self.resolve(path, Mode::Auto) {
            Resolved::Absent(_) => Err(enoent()),
            Resolved::Virtual(resolved_path) => {
                let fh = self.synthetic_fds.insert(resolved_path, flags).await;
                Ok(ReplyOpen { fh, flags: 0 })
            }
            Resolved::Physical(p) => {
                let file = open_with_flags(&p, flags).await.map_err(Errno::from)?;
                let fh = self.real_fds.insert(file).await;
                Ok(ReplyOpen { fh, flags: 0 })
            }
        }
    }

    async fn create(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> fuse3::Result<ReplyCreated> {
        let resolved = self.resolve_child(parent, name, Mode::ForcePhysical);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(resolved.path())
            .await
            .map_err(Errno::from)?;
        let attr = self.build_attr(&resolved, true).await.map_err(Errno::from)?;
        let fh = self.real_fds.insert(file).await;
        Ok(ReplyCreated { ttl: ATTR_TTL, attr, generation: 0, fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> fuse3::Result<ReplyData> {
        if self.synthetic_fds.contains(fh).await {
            return Ok(ReplyData { data: read_stub(offset, size) });
        }
        let data = self.real_fds.read(fh, offset, size).await.map_err(Errno::from)?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> fuse3::Result<ReplyWrite> {
        if self.synthetic_fds.contains(fh).await {
            return Err(eremote());
        }
        let written = self.real_fds.write(fh, offset, data).await.map_err(Errno::from)?;
        Ok(ReplyWrite { written })
    }

    async fn statfs(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyStatFs> {
        let resolved = self.resolve(path, Mode::Auto);
        let target = if matches!(resolved, Resolved::Absent(_)) {
            self.ctx.root_dir.clone()
        } else {
            resolved.path().to_path_buf()
        };
        host_statfs(&target, self.ctx.read_block_size).map_err(Errno::from)
    }

    async fn release(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> fuse3::Result<()> {
        if self.synthetic_fds.remove(fh).await.is_none() {
            self.real_fds.remove(fh).await;
        }
        Ok(())
    }

    async fn fsync(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _datasync: bool,
    ) -> fuse3::Result<()> {
        if self.synthetic_fds.contains(fh).await {
            return Ok(());
        }
        self.real_fds.flush(fh).await.map_err(Errno::from)?;
        Ok(())
    }

    async fn flush(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _lock_owner: u64,
    ) -> fuse3::Result<()> {
        if self.synthetic_fds.contains(fh).await {
            return Ok(());
        }
        self.real_fds.flush(fh).await.map_err(Errno::from)?;
        Ok(())
    }

    async fn setxattr(
        &self,
        req: Request,
        path: &OsStr,
        name: &OsStr,
        value: &[u8],
        flags: u32,
        _position: u32,
    ) -> fuse3::Result<()> {
        if name != VIRTUAL_XATTR {
            return delegate_setxattr(self.resolve(path, Mode::Auto).path(), name, value, flags).await;
        }

        if is_transparent(&req, self.ctx.client_pid) {
            return Ok(());
        }

        let resolved = self.resolve(path, Mode::Auto);
        match (desired_state(value), &resolved) {
            (DesiredState::Virtual, Resolved::Physical(p)) => {
                physical_to_virtual(p, &self.ctx.virtual_suffix).await.map_err(Errno::from)?;
            }
            (DesiredState::Physical, Resolved::Virtual(p)) => {
                virtual_to_physical(p, &self.ctx.control_socket_path, self.ctx.control_socket_timeout).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn getxattr(
        &self,
        _req: Request,
        path: &OsStr,
        name: &OsStr,
        size: u32,
    ) -> fuse3::Result<ReplyXAttr> {
        let resolved = self.resolve(path, Mode::Auto);

        if name != VIRTUAL_XATTR {
            return delegate_getxattr(resolved.path(), name, size).await;
        }

        let meta = tokio::fs::symlink_metadata(resolved.path()).await.map_err(Errno::from)?;
        if !meta.is_file() {
            return delegate_getxattr(resolved.path(), name, size).await;
        }

        let value = state_value(resolved.is_virtual());
        if size == 0 {
            return Ok(ReplyXAttr::Size(value.len() as u32));
        }
        if (size as usize) < value.len() {
            return Err(Errno::from(libc::ERANGE));
        }
        Ok(ReplyXAttr::Data(bytes::Bytes::from_static(value)))
    }

    async fn listxattr(&self, _req: Request, path: &OsStr, size: u32) -> fuse3::Result<ReplyXAttr> {
        let resolved = self.resolve(path, Mode::Auto);
        let meta = tokio::fs::symlink_metadata(resolved.path()).await.map_err(Errno::from)?;
        let underlying = host_listxattr(resolved.path()).unwrap_or_default();
        let names = with_synthetic_name(underlying, meta.is_file());

        if size == 0 {
            return Ok(ReplyXAttr::Size(names.len() as u32));
        }
        if (size as usize) < names.len() {
            return Err(Errno::from(libc::ERANGE));
        }
        Ok(ReplyXAttr::Data(bytes::Bytes::from(names)))
    }

    async fn removexattr(&self, _req: Request, path: &OsStr, name: &OsStr) -> fuse3::Result<()> {
        if name == VIRTUAL_XATTR {
            return Err(Errno::from(libc::ENOSYS));
        }
        let resolved = self.resolve(path, Mode::Auto);
        host_removexattr(resolved.path(), name).map_err(Errno::from)
    }

    async fn access(&self, _req: Request, path: &OsStr, mask: u32) -> fuse3::Result<()> {
        let resolved = self.resolve(path, Mode::Auto);
        let c_path = std::ffi::CString::new(resolved.path().as_os_str().as_bytes()).map_err(|_| enoent())?;
        let rc = unsafe { libc::access(c_path.as_ptr(), mask as i32) };
        if rc != 0 {
            return Err(Errno::from(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    type DirEntryStream<'a>
        = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
    where
        Self: 'a;

    async fn opendir(&self, _req: Request, _path: &OsStr, _flags: u32) -> fuse3::Result<ReplyOpen> {
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        req: Request,
        path: &'a OsStr,
        _fh: u64,
        offset: i64,
    ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let transparent = is_transparent(&req, self.ctx.client_pid);
        let resolved = self.resolve(path, Mode::Auto);
        let mut read = tokio::fs::read_dir(resolved.path()).await.map_err(Errno::from)?;

        let mut entries = Vec::new();
        if offset == 0 {
            entries.push(Ok(DirectoryEntry { kind: FileType::Directory, name: ".".into(), offset: 1 }));
        }
        if offset <= 1 {
            entries.push(Ok(DirectoryEntry { kind: FileType::Directory, name: "..".into(), offset: 2 }));
        }
        let mut next_offset = 3i64;

        let mut seen: HashSet<std::ffi::OsString> = HashSet::new();
        while let Some(entry) = read.next_entry().await.map_err(Errno::from)? {
            let raw_name = entry.file_name();
            let visible = self.user_visible_name(&raw_name, transparent);
            if !seen.insert(visible.clone()) {
                continue;
            }
            let file_type = entry.file_type().await.map_err(Errno::from)?;
            let kind = file_type_of(&file_type);

            if next_offset > offset {
                entries.push(Ok(DirectoryEntry { kind, name: visible, offset: next_offset }));
            }
            next_offset += 1;
        }

        Ok(ReplyDirectory { entries: stream::iter(entries) })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        path: &'a OsStr,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let transparent = is_transparent(&req, self.ctx.client_pid);
        let resolved = self.resolve(path, Mode::Auto);
        let mut read = tokio::fs::read_dir(resolved.path()).await.map_err(Errno::from)?;
        let offset = offset as i64;

        let dir_attr = self.build_attr(&resolved, transparent).await.map_err(Errno::from)?;
        let mut entries = Vec::new();
        if offset == 0 {
            entries.push(Ok(DirectoryEntryPlus {
                kind: FileType::Directory,
                name: ".".into(),
                offset: 1,
                attr: dir_attr,
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            }));
        }
        if offset <= 1 {
            entries.push(Ok(DirectoryEntryPlus {
                kind: FileType::Directory,
                name: "..".into(),
                offset: 2,
                attr: dir_attr,
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            }));
        }

        let mut next_offset = 3i64;
        let mut seen: HashSet<std::ffi::OsString> = HashSet::new();
        while let Some(entry) = read.next_entry().await.map_err(Errno::from)? {
            let raw_name = entry.file_name();
            let visible = self.user_visible_name(&raw_name, transparent);
            if !seen.insert(visible.clone()) {
                continue;
            }

            let child_resolved = resolve(
                &self.ctx.root_dir,
                &join(path, &visible),
                &self.ctx.virtual_suffix,
                Mode::Auto,
            );
            let attr = match self.build_attr(&child_resolved, transparent).await {
                Ok(attr) => attr,
                Err(_) => continue,
            };

            if next_offset > offset {
                entries.push(Ok(DirectoryEntryPlus {
                    kind: attr.kind,
                    name: visible,
                    offset: next_offset,
                    attr,
                    entry_ttl: ATTR_TTL,
                    attr_ttl: ATTR_TTL,
                }));
            }
            next_offset += 1;
        }

        Ok(ReplyDirectoryPlus { entries: stream::iter(entries) })
    }
}

fn file_type_of(ft: &std::fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    }
}

async fn open_with_flags(path: &Path, flags: u32) -> std::io::Result<tokio::fs::File> {
    let mut opts = OpenOptions::new();
    let access_mode = flags as i32 & libc::O_ACCMODE;
    opts.read(access_mode == libc::O_RDONLY || access_mode == libc::O_RDWR);
    opts.write(access_mode == libc::O_WRONLY || access_mode == libc::O_RDWR);
    if flags as i32 & libc::O_APPEND != 0 {
        opts.append(true);
    }
    opts.open(path).await
}

async fn delegate_setxattr(path: &Path, name: &OsStr, value: &[u8], flags: u32) -> fuse3::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| enoent())?;
    let c_name = std::ffi::CString::new(name.as_bytes()).map_err(|_| enoent())?;
    let rc = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            flags as i32,
        )
    };
    if rc != 0 {
        return Err(Errno::from(std::io::Error::last_os_error()));
    }
    Ok(())
}

async fn delegate_getxattr(path: &Path, name: &OsStr, size: u32) -> fuse3::Result<ReplyXAttr> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| enoent())?;
    let c_name = std::ffi::CString::new(name.as_bytes()).map_err(|_| enoent())?;
    let needed =
        unsafe { libc::getxattr(c_path.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0) };
    if needed < 0 {
        return Err(Errno::from(std::io::Error::last_os_error()));
    }
    if size == 0 {
        return Ok(ReplyXAttr::Size(needed as u32));
    }
    let mut buf = vec![0u8; needed as usize];
    let rc = unsafe {
        libc::getxattr(c_path.as_ptr(), c_name.as_ptr(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
    };
    if rc < 0 {
        return Err(Errno::from(std::io::Error::last_os_error()));
    }
    buf.truncate(rc as usize);
    if (size as usize) < buf.len() {
        return Err(Errno::from(libc::ERANGE));
    }
    Ok(ReplyXAttr::Data(bytes::Bytes::from(buf)))
}

fn host_listxattr(path: &Path) -> std::io::Result<Vec<u8>> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let needed = unsafe { libc::listxattr(c_path.as_ptr(), std::ptr::null_mut(), 0) };
    if needed < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let mut buf = vec![0u8; needed as usize];
    let rc = unsafe { libc::listxattr(c_path.as_ptr(), buf.as_mut_ptr() as *mut i8, buf.len()) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    buf.truncate(rc as usize);
    Ok(buf)
}

fn host_removexattr(path: &Path, name: &OsStr) -> std::io::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let c_name = std::ffi::CString::new(name.as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let rc = unsafe { libc::removexattr(c_path.as_ptr(), c_name.as_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn host_statfs(path: &Path, forced_bsize: u32) -> std::io::Result<ReplyStatFs> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ReplyStatFs {
        blocks: stat.f_blocks,
        bfree: stat.f_bfree,
        bavail: stat.f_bavail,
        files: stat.f_files,
        ffree: stat.f_ffree,
        bsize: forced_bsize,
        namelen: stat.f_namemax as u32,
        frsize: stat.f_frsize as u32,
    })
}

fn chown_path(path: &Path, uid: Option<u32>, gid: Option<u32>) -> std::io::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let rc = unsafe {
        libc::chown(
            c_path.as_ptr(),
            uid.unwrap_or(u32::MAX),
            gid.unwrap_or(u32::MAX),
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn utimens_path(
    path: &Path,
    atime: Option<fuse3::Timestamp>,
    mtime: Option<fuse3::Timestamp>,
) -> std::io::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let specs = [to_timespec(atime), to_timespec(mtime)];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), specs.as_ptr(), 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn to_timespec(ts: Option<fuse3::Timestamp>) -> libc::timespec {
    match ts {
        Some(ts) => libc::timespec { tv_sec: ts.sec as libc::time_t, tv_nsec: ts.nsec as libc::c_long },
        None => libc::timespec { tv_sec: 0, tv_nsec: libc::UTIME_OMIT },
    }
}

/// Mount the filesystem once and block until unmounted.
///
/// Does not itself retry on `allow_other` failure — the original's
/// try/except-RuntimeError fallback needs a fresh `MountContext` (the
/// placeholder-database connection isn't reusable across attempts), so that
/// retry lives in `ocffsd`, which can reconstruct the context.
pub async fn mount(ctx: MountContext, mountpoint: &Path, allow_other: bool) -> std::io::Result<()> {
    let fs = OcffsFs::new(ctx);

    let mut opts = MountOptions::default();
    opts.fs_name("ocffs");
    opts.force_readdir_plus(true);
    if allow_other {
        opts.allow_other(true);
    }

    info!(mountpoint = %mountpoint.display(), allow_other, "mounting ocffs");
    let handle = Session::new(opts).mount_with_unprivileged(fs, mountpoint).await?;
    handle.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn utimens_path_sets_both_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hi").unwrap();

        utimens_path(&path, Some(fuse3::Timestamp::new(1_000_000, 0)), Some(fuse3::Timestamp::new(2_000_000, 0)))
            .unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.atime(), 1_000_000);
        assert_eq!(meta.mtime(), 2_000_000);
    }

    #[test]
    fn utimens_path_omits_unset_half() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hi").unwrap();
        utimens_path(&path, Some(fuse3::Timestamp::new(5_000_000, 0)), Some(fuse3::Timestamp::new(5_000_000, 0)))
            .unwrap();

        utimens_path(&path, None, Some(fuse3::Timestamp::new(9_000_000, 0))).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.atime(), 5_000_000);
        assert_eq!(meta.mtime(), 9_000_000);
    }
}
