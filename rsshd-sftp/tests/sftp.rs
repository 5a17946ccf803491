use ssh_encoding::Encode;

use rsshd_sftp::protocol::{kind, OpenFlags};

mod common;
use common::Reply;

const OK: u32 = 0;
const EOF: u32 = 1;
const PERMISSION_DENIED: u32 = 3;
const FAILURE: u32 = 4;
const OP_UNSUPPORTED: u32 = 8;

#[tokio::test]
async fn paths_never_leave_the_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("etc")).unwrap();

    let (mut client, task) = common::start(dir.path()).await;

    client.put("/../../etc/passwd", b"root:x:0:0").await;
    assert_eq!(
        std::fs::read(dir.path().join("etc/passwd")).unwrap(),
        b"root:x:0:0"
    );

    let Reply::Name(names) = client.path(kind::REALPATH, "/../..").await else {
        panic!("expected a name");
    };
    assert_eq!(names[0].0, "/");

    let Reply::Name(names) = client.path(kind::REALPATH, "etc/../etc/./passwd").await else {
        panic!("expected a name");
    };
    assert_eq!(names[0].0, "/etc/passwd");

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn symbolic_links_cannot_escape() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret"), b"hidden").unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

    let (mut client, _task) = common::start(dir.path()).await;

    assert!(matches!(
        client.path(kind::STAT, "/escape/secret").await,
        Reply::Status(PERMISSION_DENIED)
    ));
    assert!(matches!(
        client.open("/escape/secret", OpenFlags::READ).await,
        Reply::Status(PERMISSION_DENIED)
    ));
    assert!(matches!(
        client.path(kind::OPENDIR, "/escape").await,
        Reply::Status(PERMISSION_DENIED)
    ));

    // The link itself lives inside the root.
    assert!(matches!(
        client.path(kind::LSTAT, "/escape").await,
        Reply::Attrs(_)
    ));

    // Links created by the peer point inside the root.
    assert!(matches!(
        client.two_paths(kind::SYMLINK, "/etc", "/link").await,
        Reply::Status(OK)
    ));
    assert_eq!(
        std::fs::read_link(dir.path().join("link")).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap().join("etc")
    );
    let Reply::Name(names) = client.path(kind::READLINK, "/link").await else {
        panic!("expected a name");
    };
    assert_eq!(names[0].0, "/etc");
}

#[tokio::test]
async fn reads_past_the_end_are_eof() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data"), b"0123456789").unwrap();

    let (mut client, _task) = common::start(dir.path()).await;
    let handle = client.handle("/data", OpenFlags::READ).await;

    let Reply::Data(data) = client.read_at(&handle, 4, 100).await else {
        panic!("expected data");
    };
    assert_eq!(data, b"456789");

    assert!(matches!(
        client.read_at(&handle, 10, 100).await,
        Reply::Status(EOF)
    ));

    assert!(matches!(client.close(&handle).await, Reply::Status(OK)));
    assert!(matches!(
        client.read_at(&handle, 0, 1).await,
        Reply::Status(FAILURE)
    ));
}

#[tokio::test]
async fn directories_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"").unwrap();
    std::fs::write(dir.path().join("b"), b"").unwrap();
    std::fs::create_dir(dir.path().join("c")).unwrap();

    let (mut client, _task) = common::start(dir.path()).await;

    let Reply::Handle(handle) = client.path(kind::OPENDIR, "/").await else {
        panic!("expected a handle");
    };

    let mut listed = Vec::new();
    loop {
        match client
            .request(kind::READDIR, |writer| {
                handle.encode(writer).unwrap();
            })
            .await
        {
            Reply::Name(names) => listed.extend(names),
            Reply::Status(EOF) => break,
            reply => panic!("unexpected reply: {reply:?}"),
        }
    }

    let mut names: Vec<_> = listed.iter().map(|(name, _, _)| name.as_str()).collect();
    names.sort();
    assert_eq!(names, [".", "..", "a", "b", "c"]);

    let (_, longname, attrs) = listed.iter().find(|(name, _, _)| name == "c").unwrap();
    assert!(attrs.is_dir());
    assert!(longname.starts_with('d') && longname.ends_with(" c"));
}

#[tokio::test]
async fn renames_only_overwrite_with_the_posix_extension() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"first").unwrap();
    std::fs::write(dir.path().join("b"), b"second").unwrap();

    let (mut client, _task) = common::start(dir.path()).await;

    assert!(matches!(
        client.two_paths(kind::RENAME, "/a", "/b").await,
        Reply::Status(FAILURE)
    ));
    assert_eq!(std::fs::read(dir.path().join("b")).unwrap(), b"second");

    let reply = client
        .request(kind::EXTENDED, |writer| {
            for field in ["posix-rename@openssh.com", "/a", "/b"] {
                field.encode(writer).unwrap();
            }
        })
        .await;
    assert!(matches!(reply, Reply::Status(OK)));
    assert_eq!(std::fs::read(dir.path().join("b")).unwrap(), b"first");
    assert!(!dir.path().join("a").exists());

    assert!(matches!(
        client.two_paths(kind::RENAME, "/b", "/c").await,
        Reply::Status(OK)
    ));
}

#[tokio::test]
async fn the_root_cannot_be_removed_or_moved() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"content").unwrap();

    let (mut client, _task) = common::start(dir.path()).await;

    for path in ["/", ".", "/.."] {
        assert!(matches!(
            client.path(kind::RMDIR, path).await,
            Reply::Status(PERMISSION_DENIED)
        ));
        assert!(matches!(
            client.path(kind::REMOVE, path).await,
            Reply::Status(PERMISSION_DENIED)
        ));
    }
    assert!(matches!(
        client.two_paths(kind::RENAME, "/", "/moved").await,
        Reply::Status(PERMISSION_DENIED)
    ));
    assert!(matches!(
        client.two_paths(kind::RENAME, "/a", "/").await,
        Reply::Status(PERMISSION_DENIED)
    ));
    assert!(matches!(
        client.two_paths(kind::SYMLINK, "/a", "/").await,
        Reply::Status(PERMISSION_DENIED)
    ));

    let reply = client
        .request(kind::EXTENDED, |writer| {
            for field in ["posix-rename@openssh.com", "/a", "/"] {
                field.encode(writer).unwrap();
            }
        })
        .await;
    assert!(matches!(reply, Reply::Status(PERMISSION_DENIED)));

    assert!(dir.path().is_dir());
    assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"content");
    assert!(!dir.path().join("moved").exists());
}

#[tokio::test]
async fn files_and_directories_are_managed() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _task) = common::start(dir.path()).await;

    let reply = client
        .request(kind::MKDIR, |writer| {
            "/new".encode(writer).unwrap();
            rsshd_sftp::attrs::FileAttributes::default()
                .encode(writer)
                .unwrap();
        })
        .await;
    assert!(matches!(reply, Reply::Status(OK)));
    assert!(dir.path().join("new").is_dir());

    client.put("/new/file", b"content").await;

    assert!(matches!(
        client
            .open("/new/file", OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL)
            .await,
        Reply::Status(FAILURE)
    ));

    let reply = client
        .request(kind::SETSTAT, |writer| {
            "/new/file".encode(writer).unwrap();
            rsshd_sftp::attrs::FileAttributes {
                size: Some(3),
                permissions: Some(0o600),
                atime_mtime: Some((1_000_000, 2_000_000)),
                ..Default::default()
            }
            .encode(writer)
            .unwrap();
        })
        .await;
    assert!(matches!(reply, Reply::Status(OK)));

    let Reply::Attrs(attrs) = client.path(kind::STAT, "/new/file").await else {
        panic!("expected attributes");
    };
    assert_eq!(attrs.size, Some(3));
    assert_eq!(attrs.permissions.map(|mode| mode & 0o777), Some(0o600));
    assert_eq!(attrs.atime_mtime, Some((1_000_000, 2_000_000)));

    assert!(matches!(
        client.path(kind::RMDIR, "/new").await,
        Reply::Status(FAILURE)
    ));
    assert!(matches!(
        client.path(kind::REMOVE, "/new/file").await,
        Reply::Status(OK)
    ));
    assert!(matches!(
        client.path(kind::RMDIR, "/new").await,
        Reply::Status(OK)
    ));
    assert!(matches!(
        client.path(kind::STAT, "/new").await,
        Reply::Status(2)
    ));
}

#[tokio::test]
async fn unknown_extensions_are_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _task) = common::start(dir.path()).await;

    let reply = client
        .request(kind::EXTENDED, |writer| {
            "statvfs@openssh.com".encode(writer).unwrap();
            "/".encode(writer).unwrap();
        })
        .await;
    assert!(matches!(reply, Reply::Status(OP_UNSUPPORTED)));
}
