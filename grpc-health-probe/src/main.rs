use clap::Parser;
use grpc_health_probe::{logging, run, ExitStatus, ProbeArgs, ProbeError};
use std::process::ExitCode;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match ProbeArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitStatus::InvalidArguments.into()
            } else {
                ExitStatus::Serving.into()
            };
        }
    };

    logging::init(args.verbose, args.log_format);

    let result = match args.validate() {
        Ok(config) => run(&config).await,
        Err(e) => Err(e),
    };

    if let Err(ProbeError::Validation(msg)) = &result {
        error!("{}", msg);
    }

    ExitStatus::from(&result).into()
}
