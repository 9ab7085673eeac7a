pub mod attr;
pub mod core;
pub mod error;
pub mod handle;
mod io;
mod lookup;
pub mod node;
mod readdir;
pub mod static_content;

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;

pub use self::attr::{NodeAttr, NodeKind};
pub use self::core::{DirEntry, EntryInvalidator, FsCore};
pub use self::error::FsError;
pub use self::node::Node;

/// Log once at the errno-translation boundary, then hand the kernel its
/// number. Ordinary lookup misses stay quiet.
fn translate(op: &'static str, err: &FsError) -> c_int {
    if err.is_noteworthy() {
        tracing::warn!(op, error = %err, "operation failed");
    } else {
        tracing::debug!(op, error = %err, "miss");
    }
    err.errno()
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
        NodeKind::Symlink => FileType::Symlink,
    }
}

/// The fuser-facing shim: every callback bridges into the shared tokio
/// runtime, calls the typed core operation, and translates the result.
pub struct ShelleyFs {
    core: Arc<FsCore>,
    rt: tokio::runtime::Handle,
    uid: u32,
    gid: u32,
}

impl ShelleyFs {
    pub fn new(core: Arc<FsCore>, rt: tokio::runtime::Handle) -> Self {
        Self {
            core,
            rt,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn file_attr(&self, attr: &NodeAttr) -> FileAttr {
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: if attr.kind == NodeKind::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

impl Filesystem for ShelleyFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.rt.block_on(self.core.lookup(parent, name)) {
            Ok((_, attr)) => reply.entry(&attr.entry_ttl, &self.file_attr(&attr), 0),
            Err(err) => reply.error(translate("lookup", &err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        match self.rt.block_on(self.core.getattr(ino, fh)) {
            Ok(attr) => reply.attr(&attr.attr_ttl, &self.file_attr(&attr)),
            Err(err) => reply.error(translate("getattr", &err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let result = self.rt.block_on(async {
            self.core.setattr(ino, size).await?;
            self.core.getattr(ino, fh).await
        });
        match result {
            Ok(attr) => reply.attr(&attr.attr_ttl, &self.file_attr(&attr)),
            Err(err) => reply.error(translate("setattr", &err)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.rt.block_on(self.core.readlink(ino)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(err) => reply.error(translate("readlink", &err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.rt.block_on(self.core.open(ino)) {
            Ok((fh, direct_io)) => {
                let flags = if direct_io { fuser::consts::FOPEN_DIRECT_IO } else { 0 };
                reply.opened(fh, flags);
            }
            Err(err) => reply.error(translate("open", &err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.rt.block_on(self.core.read(fh, offset.max(0) as u64, size)) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(translate("read", &err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.rt.block_on(self.core.write(ino, fh, data)) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(translate("write", &err)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.rt.block_on(self.core.flush(ino, fh)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(translate("flush", &err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.core.release(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.rt.block_on(self.core.readdir(ino)) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(translate("readdir", &err));
                return;
            }
        };
        let mut rows: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (fuser::FUSE_ROOT_ID, FileType::Directory, "..".to_string()),
        ];
        rows.extend(
            entries
                .into_iter()
                .map(|e| (e.ino, file_type(e.kind), e.name)),
        );
        for (i, (ino, kind, name)) in rows.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EPERM);
            return;
        };
        let result = self.rt.block_on(async {
            let (ino, fh) = self.core.create(parent, name).await?;
            let node = self.core.resolve(ino)?;
            let attr = self.core.attr_for(&node).await?;
            Ok::<_, FsError>((attr, fh))
        });
        match result {
            Ok((attr, fh)) => {
                reply.created(&attr.entry_ttl, &self.file_attr(&attr), 0, fh, 0);
            }
            Err(err) => reply.error(translate("create", &err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EPERM);
            return;
        };
        match self.rt.block_on(self.core.unlink(parent, name)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(translate("unlink", &err)),
        }
    }
}

struct NotifierInvalidator(fuser::Notifier);

impl EntryInvalidator for NotifierInvalidator {
    fn inval_entry(&self, parent: u64, name: &str) {
        // Failure only means the kernel keeps its dentry until the TTL runs
        // out; nothing to recover.
        if let Err(e) = self.0.inval_entry(parent, OsStr::new(name)) {
            tracing::debug!(parent, name, error = %e, "entry invalidation not delivered");
        }
    }
}

/// Mount and serve until unmounted. Blocks the calling thread; backend work
/// runs on the provided runtime.
pub fn mount(
    core: Arc<FsCore>,
    rt: tokio::runtime::Handle,
    mountpoint: &Path,
    options: &[MountOption],
) -> anyhow::Result<()> {
    let fs = ShelleyFs::new(core.clone(), rt.clone());
    let mut session = fuser::Session::new(fs, mountpoint, options)?;
    core.set_invalidator(Arc::new(NotifierInvalidator(session.notifier())));

    let mut unmounter = session.unmount_callable();
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, unmounting");
            let _ = unmounter.unmount();
        }
    });

    session.run()?;
    Ok(())
}
