use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use wsbridge::endpoint::{pipe_endpoints, Endpoint, EndpointConfig, ProcessEndpoint, WebSocketEndpoint};
use wsbridge::transport::LaunchedProcess;

use crate::cmd::ServeArgs;
use crate::exit::{io_error, transport_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = endpoint_config(&args)?;
    let command: Arc<[String]> = args.command.into();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(args.listen, command, config))
}

fn endpoint_config(args: &ServeArgs) -> CliResult<EndpointConfig> {
    if args.size_header && args.max_frame == 0 {
        return Err(CliError::new(USAGE, "--max-frame must be greater than zero"));
    }
    Ok(EndpointConfig {
        binary: args.binary,
        size_header: args.size_header,
        max_frame_size: args.max_frame,
        close_time: Duration::from_millis(args.closems),
    })
}

async fn serve(
    addr: SocketAddr,
    command: Arc<[String]>,
    config: EndpointConfig,
) -> CliResult<i32> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| io_error("bind failed", err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("bind failed", err))?;
    info!(addr = %local, command = ?command, "listening");

    let shutdown = CancellationToken::new();
    let mut connections = JoinSet::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                info!("interrupt received, shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(
                        handle_connection(
                            stream,
                            command.clone(),
                            config.clone(),
                            shutdown.child_token(),
                        )
                        .instrument(info_span!("connection", %peer)),
                    );
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    error!(error = %err, "connection task failed");
                }
            }
        }
    }

    shutdown.cancel();
    while let Some(joined) = connections.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "connection task failed");
        }
    }

    Ok(SUCCESS)
}

async fn handle_connection(
    stream: TcpStream,
    command: Arc<[String]>,
    config: EndpointConfig,
    shutdown: CancellationToken,
) {
    if let Err(err) = bridge(stream, &command, config, &shutdown).await {
        error!(code = err.code, error = %err, "connection failed");
    }
}

async fn bridge(
    stream: TcpStream,
    command: &[String],
    config: EndpointConfig,
    shutdown: &CancellationToken,
) -> CliResult<()> {
    let ws = tokio::select! {
        ws = tokio_tungstenite::accept_async(stream) => {
            ws.map_err(|err| transport_error("websocket handshake failed", err.into()))?
        }
        _ = shutdown.cancelled() => return Ok(()),
    };

    let (program, program_args) = command
        .split_first()
        .ok_or_else(|| CliError::new(USAGE, "no command given"))?;
    let process = LaunchedProcess::launch(program, program_args)
        .map_err(|err| transport_error("launch failed", err))?;
    info!(pid = process.pid(), program = %program, "bridging connection");

    let mut connection = WebSocketEndpoint::from_stream(ws, config.clone());
    let mut process = ProcessEndpoint::new(process, config);

    tokio::select! {
        _ = pipe_endpoints(&mut connection, &mut process) => {
            debug!(exited = process.has_exited(), "bridge finished");
        }
        _ = shutdown.cancelled() => {
            let outcome = process.terminate_process().await;
            debug!(?outcome, "process terminated on shutdown");
            connection.terminate().await;
        }
    }

    connection.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(binary: bool, size_header: bool, max_frame: usize, closems: u64) -> ServeArgs {
        ServeArgs {
            listen: "127.0.0.1:0".parse().unwrap(),
            binary,
            size_header,
            max_frame,
            closems,
            command: vec!["cat".to_string()],
        }
    }

    #[test]
    fn config_carries_flags() {
        let config = endpoint_config(&args(true, true, 1024, 250)).unwrap();
        assert!(config.binary);
        assert!(config.size_header);
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.close_time, Duration::from_millis(250));
    }

    #[test]
    fn zero_max_frame_with_size_header_is_usage_error() {
        let err = endpoint_config(&args(false, true, 0, 0)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn zero_max_frame_is_ignored_without_size_header() {
        assert!(endpoint_config(&args(false, false, 0, 0)).is_ok());
    }
}
