use streamtap_config::Settings;

use crate::cmd::ConfigArgs;
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::output::{print_settings, OutputFormat};

pub fn run(args: ConfigArgs, format: OutputFormat) -> CliResult<i32> {
    let settings =
        Settings::load(&args.file).map_err(|err| config_error("config load failed", err))?;
    print_settings(&settings, format);
    Ok(SUCCESS)
}
