use fat32_nav::{Fat32Volume, Navigator, VolumeGeometry};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let (Some(image), None) = (args.next(), args.next()) else {
        eprintln!("Usage: fatnav <FAT32 image>");
        return ExitCode::FAILURE;
    };

    let volume = match Fat32Volume::open(&image) {
        Ok(volume) => volume,
        Err(e) => {
            eprintln!("Cannot mount {}: {}", image, e);
            return ExitCode::FAILURE;
        }
    };
    let mut navigator = Navigator::new(volume);

    if let Err(e) = run(&image, &mut navigator) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(image: &str, navigator: &mut Navigator<File>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("[{}{}]/> ", image, navigator.path());
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("exit"), _) => break,
            (Some("info"), _) => print_info(navigator.info()),
            (Some("ls"), _) => match navigator.entries() {
                Ok(entries) => {
                    println!(".\n..");
                    for e in entries {
                        let typ = if e.is_directory() { "<DIR>" } else { "     " };
                        println!(
                            "{:12} {}  cluster={}  size={}",
                            e.display_name(),
                            typ,
                            e.first_cluster,
                            e.file_size
                        );
                    }
                }
                Err(e) => println!("ls: {}", e),
            },
            (Some("cd"), Some(name)) => {
                if let Err(e) = navigator.change_directory(name) {
                    println!("cd: {}", e);
                }
            }
            (Some("mkdir"), Some(name)) => {
                if let Err(e) = navigator.create_subdirectory(name) {
                    println!("mkdir: {}", e);
                }
            }
            (None, _) => {}
            _ => println!("Unknown command"),
        }
    }
    Ok(())
}

fn print_info(geometry: &VolumeGeometry) {
    println!("Bytes Per Sector: {}", geometry.bytes_per_sector);
    println!("Sectors Per Cluster: {}", geometry.sectors_per_cluster);
    println!("Reserved Sectors: {}", geometry.reserved_sectors);
    println!("Number of FATs: {}", geometry.num_fats);
    println!("Sectors Per FAT: {}", geometry.sectors_per_fat);
    println!("# of Entries in One FAT: {}", geometry.fat_entries_per_table());
    println!("Root Cluster: {}", geometry.root_cluster);
    println!("Total # of Clusters in Data Region: {}", geometry.total_clusters);
    println!("Size of Image (in bytes): {}", geometry.image_size);
}
