/// The fixed executable served as `model/{name}/new/start`.
pub const START_SCRIPT: &str = r#"#!/bin/sh
# Start a conversation on this model: the message is read from stdin and the
# new conversation id is printed on stdout.
#
#   echo "Hello!" | ./start
set -e
DIR=$(dirname "$0")
ROOT="$DIR/../../.."
ID=$(cat "$DIR/clone")
echo "cwd=$PWD" > "$ROOT/conversation/$ID/ctl"
cat > "$ROOT/conversation/$ID/send"
echo "$ID"
"#;

/// `/README.md` at the mount root.
pub const README: &str = r#"# shelleyfs

This mount projects a Shelley conversation backend as a directory tree, so
conversations can be driven from any shell.

## Layout

    README.md                     this file
    model/                        one directory per backend model
    model/default                 symlink to the backend's default model
    model/<name>/id               backend model id
    model/<name>/ready            present while the model is ready
    model/<name>/new/clone        read it to allocate a conversation id
    model/<name>/new/start        executable quick-start script
    new                           symlink to model/default/new
    conversation/                 one directory per conversation
    conversation/<id>/ctl         pre-creation settings (model=..., cwd=...)
    conversation/<id>/send        write a message, committed on close
    conversation/<id>/created     present once committed to the backend
    conversation/<id>/archived    presence toggles archive state (touch / rm)
    conversation/<id>/messages/   history, one directory per message

## Quick start

    ID=$(cat new/clone)
    echo "model=predictable cwd=$PWD" > conversation/$ID/ctl
    echo "Hello!" > conversation/$ID/send
    cat conversation/$ID/messages/all.md

Or run the bundled script, which does the same:

    echo "Hello!" | ./new/start

## Reading history

    messages/count                number of messages
    messages/all.md               whole conversation as markdown
    messages/all.json             raw backend JSON
    messages/<n>-<slug>/          one message: field files plus content.md
    messages/last/3/              symlinks to the last three messages
    messages/since/user/1/        everything after your last message

`conversation/<id>/waiting_for_input` appears when the agent has finished
its turn and expects you to speak next.
"#;
