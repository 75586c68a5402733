use std::fs::File;
use std::io::{BufReader, Read};

use mtlipc_frame::{Frame, FrameConfig, FrameReader, Result as FrameResult};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_frames, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let file = File::open(&args.path)
        .map_err(|err| io_error(&format!("failed opening {}", args.path.display()), err))?;

    let mut config = FrameConfig::default();
    if let Some(max) = args.max_payload {
        config.max_payload_size = max;
    }

    let frames = decode_all(BufReader::new(file), config)
        .map_err(|err| frame_error(&format!("failed decoding {}", args.path.display()), err))?;
    print_frames(&frames, format);
    Ok(SUCCESS)
}

fn decode_all<R: Read>(reader: R, config: FrameConfig) -> FrameResult<Vec<Frame>> {
    FrameReader::with_config(reader, config).collect()
}
