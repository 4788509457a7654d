//! Child side of the process backend.
//!
//! A synchronous loop: read `Init`, confine the process, build one engine,
//! answer `Ready`, then serve `Execute` requests until `Shutdown` or EOF.
//! Data reads inside an execution are blocking round-trips on the same
//! pipe: the runner writes a `DataRequest` and waits for the `DataReply`.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::rc::Rc;

use anyhow::Context as _;
use exprbox_types::data::{DataId, DataPath};
use exprbox_types::error::RuntimeError;
use exprbox_types::protocol::{HostMessage, RunnerMessage};
use exprbox_types::value::{FetchMode, LazyValue};

use super::limits;
use crate::isolate::{DataAccess, JsIsolate};

/// Whether the runner confines itself before serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confinement {
    Enforced,
    Disabled,
}

/// Serve the protocol on this process's stdin/stdout.
pub fn run_stdio() -> anyhow::Result<()> {
    serve(
        std::io::stdin().lock(),
        std::io::stdout().lock(),
        Confinement::Enforced,
    )
}

pub fn serve<R, W>(reader: R, writer: W, confinement: Confinement) -> anyhow::Result<()>
where
    R: BufRead + 'static,
    W: Write + 'static,
{
    let pipe = Rc::new(RefCell::new(Pipe { reader, writer }));

    let first = pipe.borrow_mut().read()?;
    let config = match first {
        Some(HostMessage::Init { config }) => config,
        Some(other) => anyhow::bail!("expected init, got {other:?}"),
        None => return Ok(()),
    };
    if confinement == Confinement::Enforced {
        limits::apply(&config).context("failed to confine runner")?;
    }
    let mut isolate = JsIsolate::new(&config).context("failed to build isolate")?;
    pipe.borrow_mut().send(&RunnerMessage::Ready)?;

    loop {
        let message = pipe.borrow_mut().read()?;
        match message {
            None | Some(HostMessage::Shutdown) => break,
            Some(HostMessage::Execute {
                code,
                data_id,
                meta,
                timeout_ms,
            }) => {
                if confinement == Confinement::Enforced {
                    if let Err(err) = limits::arm_cpu_backstop(timeout_ms) {
                        tracing::warn!(error = %err, "cpu backstop not armed");
                    }
                }
                let access: Rc<dyn DataAccess> = Rc::new(PipeAccess {
                    pipe: Rc::clone(&pipe),
                    data_id,
                });
                let outcome = isolate.evaluate(&code, &meta, access);
                pipe.borrow_mut().send(&RunnerMessage::Result { outcome })?;
            }
            Some(other) => {
                tracing::warn!(message = ?other, "ignoring unexpected host message");
            }
        }
    }
    Ok(())
}

struct Pipe<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> Pipe<R, W> {
    fn read(&mut self) -> anyhow::Result<Option<HostMessage>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let message = serde_json::from_str(line.trim_end())
            .with_context(|| format!("malformed host message: {}", line.trim_end()))?;
        Ok(Some(message))
    }

    fn send(&mut self, message: &RunnerMessage) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

struct PipeAccess<R, W> {
    pipe: Rc<RefCell<Pipe<R, W>>>,
    data_id: DataId,
}

impl<R: BufRead, W: Write> DataAccess for PipeAccess<R, W> {
    fn fetch(&self, path: &DataPath, mode: FetchMode) -> Result<LazyValue, RuntimeError> {
        let mut pipe = self
            .pipe
            .try_borrow_mut()
            .map_err(|_| RuntimeError::internal("runner pipe is busy"))?;
        pipe.send(&RunnerMessage::DataRequest {
            data_id: self.data_id,
            path: path.clone(),
            mode,
        })
        .map_err(|e| RuntimeError::bridge_lost(format!("failed to request data: {e}")))?;
        match pipe.read() {
            Ok(Some(HostMessage::DataReply { result })) => result,
            Ok(Some(other)) => Err(RuntimeError::bridge_lost(format!(
                "expected a data reply, got {other:?}"
            ))),
            Ok(None) => Err(RuntimeError::bridge_lost("host closed the pipe")),
            Err(e) => Err(RuntimeError::bridge_lost(format!("failed to read data reply: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exprbox_types::config::BridgeConfig;
    use exprbox_types::data::ExecutionMeta;
    use exprbox_types::error::RuntimeErrorCode;
    use exprbox_types::value::ExprValue;
    use serde_json::json;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn script(messages: &[HostMessage]) -> Cursor<Vec<u8>> {
        let mut input = Vec::new();
        for message in messages {
            serde_json::to_writer(&mut input, message).unwrap();
            input.push(b'\n');
        }
        Cursor::new(input)
    }

    fn replies(output: &SharedBuf) -> Vec<RunnerMessage> {
        let bytes = output.0.borrow();
        std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn answers_reads_over_the_pipe() {
        let data_id = DataId::new();
        let input = script(&[
            HostMessage::Init {
                config: BridgeConfig::default(),
            },
            HostMessage::Execute {
                code: "$json.a".into(),
                data_id,
                meta: ExecutionMeta::default(),
                timeout_ms: 5_000,
            },
            HostMessage::DataReply {
                result: Ok(LazyValue::Object {
                    keys: vec!["a".into()],
                }),
            },
            HostMessage::DataReply {
                result: Ok(LazyValue::Primitive { value: json!(5) }),
            },
            HostMessage::Shutdown,
        ]);
        let output = SharedBuf::default();
        serve(input, output.clone(), Confinement::Disabled).expect("serve");

        let replies = replies(&output);
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0], RunnerMessage::Ready);
        assert_eq!(
            replies[1],
            RunnerMessage::DataRequest {
                data_id,
                path: DataPath::json(),
                mode: FetchMode::Shallow,
            }
        );
        assert_eq!(
            replies[2],
            RunnerMessage::DataRequest {
                data_id,
                path: DataPath::json().key("a"),
                mode: FetchMode::Shallow,
            }
        );
        assert_eq!(
            replies[3],
            RunnerMessage::Result {
                outcome: Ok(ExprValue::Json(json!(5))),
            }
        );
    }

    #[test]
    fn host_errors_surface_as_the_outcome() {
        let data_id = DataId::new();
        let input = script(&[
            HostMessage::Init {
                config: BridgeConfig::default(),
            },
            HostMessage::Execute {
                code: "$json".into(),
                data_id,
                meta: ExecutionMeta::default(),
                timeout_ms: 5_000,
            },
            HostMessage::DataReply {
                result: Err(RuntimeError::internal("unknown data id")),
            },
        ]);
        let output = SharedBuf::default();
        serve(input, output.clone(), Confinement::Disabled).expect("serve");

        let replies = replies(&output);
        match replies.last() {
            Some(RunnerMessage::Result { outcome: Err(err) }) => {
                assert_eq!(err.code, RuntimeErrorCode::Internal);
            }
            other => panic!("unexpected final reply: {other:?}"),
        }
    }

    #[test]
    fn eof_before_init_is_a_clean_exit() {
        let output = SharedBuf::default();
        serve(Cursor::new(Vec::new()), output.clone(), Confinement::Disabled).expect("serve");
        assert!(output.0.borrow().is_empty());
    }
}
