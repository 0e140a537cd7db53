use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use custody_core::{FamilySummary, FileId, Pid};
use engine_api::dto::ExitStatus;

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for String {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{self}");
        Ok(TermPrinted)
    }
}

impl TermPrintable for Vec<FamilySummary> {
    fn term_print(&self) -> Result<TermPrinted> {
        if self.is_empty() {
            return "No family is being watched".to_string().term_print();
        }

        let mut sorted = self.clone();
        sorted.sort_by_key(|family| family.root);

        let mut table = table();

        table.set_header(vec![
            header("ROOT"),
            header("STATE"),
            header("POLICY"),
            header("MEMBERS"),
            header("FILES"),
            header("ORIGIN"),
        ]);

        for family in sorted {
            let (state, state_color) = if family.live {
                ("live", Color::Green)
            } else {
                ("exited", Color::Yellow)
            };

            table.add_row(vec![
                Cell::new(family.root)
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new(state)
                    .fg(state_color)
                    .add_attribute(Attribute::Bold),
                Cell::new(family.policy),
                Cell::new(family.members),
                Cell::new(family.files),
                Cell::new(family.origin),
            ]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

/// Members of the family rooted at `root`.
pub struct FamilyMembers {
    pub root: Pid,
    pub pids: Vec<Pid>,
}

impl TermPrintable for FamilyMembers {
    fn term_print(&self) -> Result<TermPrinted> {
        if self.pids.is_empty() {
            return format!("{} is not the root of a watched family", self.root).term_print();
        }

        let mut table = table();
        table.set_header(vec![header("PID"), header("ROLE")]);

        for pid in &self.pids {
            let role = if *pid == self.root { "root" } else { "member" };
            table.add_row(vec![Cell::new(pid).fg(Color::Cyan), Cell::new(role)]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

/// Files owned by the family rooted at `root`.
pub struct FamilyFiles {
    pub root: Pid,
    pub files: Vec<FileId>,
}

impl TermPrintable for FamilyFiles {
    fn term_print(&self) -> Result<TermPrinted> {
        if self.files.is_empty() {
            return format!("Family {} owns no files", self.root).term_print();
        }

        let mut table = table();
        table.set_header(vec![header("FILE ID")]);

        for file in &self.files {
            table.add_row(vec![Cell::new(file).fg(Color::Cyan)]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

impl TermPrintable for ExitStatus {
    fn term_print(&self) -> Result<TermPrinted> {
        match (self.timed_out, self.removed) {
            (true, _) => "Timed out, family members still running",
            (false, true) => "Process released",
            (false, false) => "Process was not watched",
        }
        .to_string()
        .term_print()
    }
}

fn header(name: &str) -> Cell {
    Cell::new(name).add_attribute(Attribute::Bold)
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}
