use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use sysimage::{build, BuildRequest, ExecutionLog, OutputFormat, SourceSpec};

const DEFAULT_KERNEL_ARGS: &str = "root=/dev/sda1 ro";
const DEFAULT_DISK_SIZE_MB: u64 = 128;

fn usage() -> &'static str {
    "Usage: sysimage [options] <outfile> <kernel> <root>:<source>...

Multiple sources can be provided. If a source is a tarball, it is
extracted under its root. If it is a directory, its contents are
copied under its root. Sources are overlaid in order; later sources
overwrite files placed by earlier ones.

Example:
  sudo sysimage out.raw vmlinuz /:./system/ /etc:conf.tgz

Options:
  --kernel-args <args>  Command line to pass to the kernel
                        (default \"root=/dev/sda1 ro\")
  --initrd <path>       Initrd to give the kernel on bootup, if any
  --disk-size <mb>      Size of the created disk image in MB (default 128)
  --format <format>     Format of the disk image: raw, vdi, vmdk, vhd
                        (default raw)
  --disk-uuid <uuid>    If outputting to vdi, the UUID of the disk
  --print-log           Print the log of commands that were run
  --print-fs            Print the image file tree on completion"
}

struct Invocation {
    request: BuildRequest,
    print_log: bool,
}

fn flag_value<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a String> {
    iter.next()
        .with_context(|| format!("{} requires a value", flag))
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut kernel_args = DEFAULT_KERNEL_ARGS.to_string();
    let mut initrd: Option<PathBuf> = None;
    let mut disk_size_mb = DEFAULT_DISK_SIZE_MB;
    let mut format = OutputFormat::Raw;
    let mut disk_uuid: Option<String> = None;
    let mut print_log = false;
    let mut print_tree = false;
    let mut positional: Vec<&str> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--kernel-args" => kernel_args = flag_value(&mut iter, "--kernel-args")?.clone(),
            "--initrd" => initrd = Some(PathBuf::from(flag_value(&mut iter, "--initrd")?)),
            "--disk-size" => {
                let raw = flag_value(&mut iter, "--disk-size")?;
                disk_size_mb = raw
                    .parse()
                    .with_context(|| format!("invalid disk size '{}'", raw))?;
            }
            "--format" => format = flag_value(&mut iter, "--format")?.parse()?,
            "--disk-uuid" => disk_uuid = Some(flag_value(&mut iter, "--disk-uuid")?.clone()),
            "--print-log" => print_log = true,
            "--print-fs" => print_tree = true,
            other if other.starts_with("--") => bail!("unknown option '{}'", other),
            other => positional.push(other),
        }
    }

    let (output, kernel, source_specs) = match positional.as_slice() {
        [output, kernel, sources @ ..] if !sources.is_empty() => (output, kernel, sources),
        _ => bail!("expected <outfile> <kernel> and at least one <root>:<source>"),
    };

    let sources = source_specs
        .iter()
        .map(|spec| spec.parse::<SourceSpec>())
        .collect::<Result<Vec<_>>>()?;

    Ok(Invocation {
        request: BuildRequest {
            output: PathBuf::from(*output),
            kernel: PathBuf::from(*kernel),
            initrd,
            disk_size_mb,
            kernel_cmdline: kernel_args,
            format,
            disk_uuid,
            sources,
            print_tree,
        },
        print_log,
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("error: {err:#}\n\n{}", usage());
            return ExitCode::from(2);
        }
    };

    if unsafe { libc::geteuid() } != 0 {
        eprintln!("Warning: not running as root, image construction will likely fail.");
        eprintln!("Continuing anyway, in case you have root-equivalent capabilities set.");
    }

    let mut log = ExecutionLog::new();
    match build(&invocation.request, &mut log) {
        Ok(()) => {
            if invocation.print_log {
                let _ = log.dump(&mut std::io::stderr());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            let _ = log.dump(&mut std::io::stderr());
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
