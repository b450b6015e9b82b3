use std::fs;
use std::io::{self, Write};

use flat_fs::{BlockDevice, Result};

const HELP: &str = "\
Commands:
  create <image> <block_size> <block_count>  create and open a new device image
  open <image>                               open an existing image
  close                                      close the open image
  write <block> <data>                       write raw data to a block
  read <block> <from> <to>                   hex bytes [from, to) of a block
  info                                       show the device layout
  ls                                         list files
  format                                     wipe the device
  wr <name> <text>                           write text to a file
  cat <name>                                 print a file
  hexdump <name>                             print a file as hex
  copy_in <host_file> <name>                 copy a host file into the device
  copy_out <name> <host_file>                copy a file out to the host
  rm <name>                                  remove a file
  repair                                     rebuild the free-block bitmap
  help                                       show this text
  exit                                       leave the shell";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Create {
        image: String,
        block_size: usize,
        block_count: usize,
    },
    Open(String),
    Close,
    WriteBlock { block: usize, data: String },
    ReadBlock { block: usize, from: usize, to: usize },
    Info,
    Ls,
    Format,
    Wr { name: String, text: String },
    Cat(String),
    Hexdump(String),
    CopyIn { host: String, name: String },
    CopyOut { name: String, host: String },
    Rm(String),
    Repair,
    Help,
    Exit,
}

/// Split off the first whitespace-delimited word
fn next_word(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    if line.is_empty() {
        return None;
    }
    let end = line.find(char::is_whitespace).unwrap_or(line.len());
    Some((&line[..end], &line[end..]))
}

/// Everything after the next word, minus the single separating space
fn rest_of_line(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}

fn words<const N: usize>(rest: &str, usage: &str) -> core::result::Result<[String; N], String> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < N {
        return Err(format!("Missing arguments. Usage: {}", usage));
    }
    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.to_string();
    }
    Ok(out)
}

fn number(word: &str, usage: &str) -> core::result::Result<usize, String> {
    word.parse()
        .map_err(|_| format!("{:?} is not a number. Usage: {}", word, usage))
}

impl Command {
    /// `Ok(None)` for a blank line
    pub fn parse(line: &str) -> core::result::Result<Option<Self>, String> {
        let (cmd, rest) = match next_word(line) {
            Some(split) => split,
            None => return Ok(None),
        };
        let command = match cmd {
            "create" => {
                let usage = "create <image> <block_size> <block_count>";
                let [image, size, count] = words::<3>(rest, usage)?;
                Command::Create {
                    image,
                    block_size: number(&size, usage)?,
                    block_count: number(&count, usage)?,
                }
            }
            "open" => {
                let [image] = words::<1>(rest, "open <image>")?;
                Command::Open(image)
            }
            "close" => Command::Close,
            "write" => {
                let usage = "write <block> <data>";
                let (block, data) =
                    next_word(rest).ok_or_else(|| format!("Missing arguments. Usage: {}", usage))?;
                let data = rest_of_line(data);
                if data.is_empty() {
                    return Err("No data given".into());
                }
                Command::WriteBlock {
                    block: number(block, usage)?,
                    data: data.to_string(),
                }
            }
            "read" => {
                let usage = "read <block> <from> <to>";
                let [block, from, to] = words::<3>(rest, usage)?;
                Command::ReadBlock {
                    block: number(&block, usage)?,
                    from: number(&from, usage)?,
                    to: number(&to, usage)?,
                }
            }
            "info" => Command::Info,
            "ls" => Command::Ls,
            "format" => Command::Format,
            "wr" => {
                let usage = "wr <name> <text>";
                let (name, text) =
                    next_word(rest).ok_or_else(|| format!("Missing arguments. Usage: {}", usage))?;
                let text = rest_of_line(text);
                if text.is_empty() {
                    return Err("No text given".into());
                }
                Command::Wr {
                    name: name.to_string(),
                    text: text.to_string(),
                }
            }
            "cat" => Command::Cat(words::<1>(rest, "cat <name>")?[0].clone()),
            "hexdump" => Command::Hexdump(words::<1>(rest, "hexdump <name>")?[0].clone()),
            "copy_in" => {
                let [host, name] = words::<2>(rest, "copy_in <host_file> <name>")?;
                Command::CopyIn { host, name }
            }
            "copy_out" => {
                let [name, host] = words::<2>(rest, "copy_out <name> <host_file>")?;
                Command::CopyOut { name, host }
            }
            "rm" => Command::Rm(words::<1>(rest, "rm <name>")?[0].clone()),
            "repair" => Command::Repair,
            "help" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => {
                return Err(format!(
                    "Unknown command {:?}. Type 'help' for the list of commands",
                    other
                ))
            }
        };
        Ok(Some(command))
    }
}

/// 16 bytes per line, two hex digits each
pub fn hexdump(data: &[u8]) -> String {
    data.chunks(16)
        .map(|line| {
            line.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell<W: Write> {
    device: BlockDevice,
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn new(out: W) -> Self {
        Self {
            device: BlockDevice::new(),
            out,
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    /// Parse and run one line; errors are reported, never propagated
    pub fn execute(&mut self, line: &str) -> io::Result<Flow> {
        match Command::parse(line) {
            Ok(Some(command)) => self.execute_command(command),
            Ok(None) => Ok(Flow::Continue),
            Err(usage) => {
                writeln!(self.out, "Error: {}", usage)?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn execute_command(&mut self, command: Command) -> io::Result<Flow> {
        match self.run(command) {
            Ok(flow) => Ok(flow),
            Err(e) => {
                log::debug!("command failed: {:?}", e);
                writeln!(self.out, "Error: {}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn run(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Create {
                image,
                block_size,
                block_count,
            } => {
                self.device.create(&image, block_size, block_count)?;
                writeln!(self.out, "Created {} ({} x {} bytes)", image, block_count, block_size)?;
            }
            Command::Open(image) => {
                self.device.open(&image)?;
                writeln!(self.out, "Opened {}", image)?;
            }
            Command::Close => {
                self.device.close()?;
                writeln!(self.out, "Closed")?;
            }
            Command::WriteBlock { block, data } => {
                self.device.write_block(block, data.as_bytes())?;
                writeln!(self.out, "Wrote {} bytes to block {}", data.len(), block)?;
            }
            Command::ReadBlock { block, from, to } => {
                let data = self.device.read_block(block)?;
                if from >= to || to > data.len() {
                    writeln!(
                        self.out,
                        "Error: range [{}, {}) does not fit a {}-byte block",
                        from,
                        to,
                        data.len()
                    )?;
                } else {
                    writeln!(self.out, "{}", hexdump(&data[from..to]))?;
                }
            }
            Command::Info => {
                let info = self.device.info()?;
                writeln!(self.out, "Info:")?;
                writeln!(self.out, "  Initial Block: {}", info.initial_block)?;
                writeln!(self.out, "  Inodes Per Block: {}", info.inodes_per_block)?;
                writeln!(self.out, "  Block Size: {}", info.block_size)?;
                writeln!(self.out, "  Block Count: {}", info.block_count)?;
                writeln!(self.out, "  Bitmap Block: {}", info.bitmap_block_pos)?;
                writeln!(self.out, "  Inode Table Block: {}", info.inode_table_start_block)?;
                writeln!(self.out, "  Inode Capacity: {}", info.inode_capacity)?;
                writeln!(self.out, "  Free Blocks: {}", info.free_blocks)?;
            }
            Command::Ls => {
                let files = self.device.list_files()?;
                if files.is_empty() {
                    writeln!(self.out, "No files")?;
                }
                for (name, size) in files {
                    writeln!(self.out, "- {} ({} bytes)", name, size)?;
                }
            }
            Command::Format => {
                self.device.format()?;
                writeln!(self.out, "Device formatted")?;
            }
            Command::Wr { name, text } => {
                self.device.write_file(&name, text.as_bytes())?;
                writeln!(self.out, "Wrote {} bytes to {}", text.len(), name)?;
            }
            Command::Cat(name) => {
                let content = self.device.read_file(&name)?;
                writeln!(self.out, "{}", String::from_utf8_lossy(&content))?;
            }
            Command::Hexdump(name) => {
                let content = self.device.read_file(&name)?;
                if content.is_empty() {
                    writeln!(self.out, "{} is empty", name)?;
                } else {
                    writeln!(self.out, "{}", hexdump(&content))?;
                }
            }
            Command::CopyIn { host, name } => {
                let content = fs::read(&host)?;
                self.device.write_file(&name, &content)?;
                writeln!(self.out, "Copied {} into {}", host, name)?;
            }
            Command::CopyOut { name, host } => {
                let content = self.device.read_file(&name)?;
                fs::write(&host, content)?;
                writeln!(self.out, "Copied {} to {}", name, host)?;
            }
            Command::Rm(name) => {
                self.device.remove_file(&name)?;
                writeln!(self.out, "Removed {}", name)?;
            }
            Command::Repair => {
                let reclaimed = self.device.repair()?;
                writeln!(self.out, "Reclaimed {} blocks", reclaimed)?;
            }
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }
}
