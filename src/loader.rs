use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{bail, Result};
use log::{debug, info};
use nom::bytes::complete::take_while;
use nom::character::complete::tab;
use nom::multi::separated_list0;
use nom::IResult;

use crate::buffer::BufferManager;
use crate::row::{MovieRow, PersonRow, Rowable, WorkedOnRow};

// IMDB TSVs mark missing values with \N.
const TSV_NULL: &str = "\\N";

/// Split one TSV line into its fields. Fields may be empty; the line
/// carries no quoting or escaping.
pub fn tsv_fields(line: &str) -> Vec<String> {
    let parsed: IResult<&str, Vec<&str>> =
        separated_list0(tab, take_while(|c| c != '\t'))(line);
    match parsed {
        Ok((_, fields)) => fields.into_iter().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// Stream a TSV into a heap file of fixed-width rows, appending through
/// the buffer pool one page at a time. The first line is a header and is
/// skipped; `make_row` returns None for lines to drop. Returns the number
/// of rows loaded.
pub fn load_heap_file<R, F>(
    bm: &mut BufferManager,
    tsv_path: &str,
    heap_path: &str,
    make_row: F,
) -> Result<u64>
where
    R: Rowable,
    F: Fn(&[String]) -> Option<R>,
{
    let file = match File::open(tsv_path) {
        Ok(f) => f,
        Err(e) => bail!("cannot open {}: {}", tsv_path, e),
    };
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    match lines.next() {
        Some(header) => {
            let header = header?;
            debug!("{} header: {}", tsv_path, header);
        }
        None => bail!("{} is empty", tsv_path),
    }

    bm.register_file(heap_path)?;
    let mut page = bm.create_page::<R>(heap_path)?;
    let mut loaded: u64 = 0;

    for line in lines {
        let line = line?;
        let fields = tsv_fields(&line);
        let row = match make_row(&fields) {
            Some(r) => r,
            None => continue,
        };
        if page.is_full() {
            bm.unpin_page(page.pid(), heap_path);
            page = bm.create_page::<R>(heap_path)?;
        }
        page.insert_row(&row);
        loaded += 1;
        if loaded % 1_000_000 == 0 {
            info!("loaded {} rows into {}", loaded, heap_path);
        }
    }
    bm.unpin_page(page.pid(), heap_path);

    info!("loaded {} rows into {}", loaded, heap_path);
    Ok(loaded)
}

/// title.basics.tsv: tconst at 0, primaryTitle at 2.
pub fn movie_row_from_tsv(fields: &[String]) -> Option<MovieRow> {
    if fields.len() < 3 || fields[0] == TSV_NULL || fields[2] == TSV_NULL {
        return None;
    }
    Some(MovieRow::new(&fields[0], &fields[2]))
}

/// title.principals.tsv: tconst at 0, nconst at 2, category at 3.
pub fn worked_on_row_from_tsv(fields: &[String]) -> Option<WorkedOnRow> {
    if fields.len() < 4 || fields[0] == TSV_NULL || fields[2] == TSV_NULL {
        return None;
    }
    Some(WorkedOnRow::new(&fields[0], &fields[2], &fields[3]))
}

/// name.basics.tsv: nconst at 0, primaryName at 1.
pub fn person_row_from_tsv(fields: &[String]) -> Option<PersonRow> {
    if fields.len() < 2 || fields[0] == TSV_NULL || fields[1] == TSV_NULL {
        return None;
    }
    Some(PersonRow::new(&fields[0], &fields[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_tsv_fields_split() {
        assert_eq!(tsv_fields("a\tb\tc"), vec!["a", "b", "c"]);
        assert_eq!(tsv_fields("a\t\tc"), vec!["a", "", "c"]);
        assert_eq!(tsv_fields("single"), vec!["single"]);
    }

    #[test]
    fn test_row_builders_skip_nulls() {
        let ok = vec![
            "tt0000001".to_string(),
            "short".to_string(),
            "Carmencita".to_string(),
        ];
        assert!(movie_row_from_tsv(&ok).is_some());

        let null_title = vec![
            "tt0000001".to_string(),
            "short".to_string(),
            "\\N".to_string(),
        ];
        assert!(movie_row_from_tsv(&null_title).is_none());
        assert!(movie_row_from_tsv(&["tt1".to_string()]).is_none());
    }

    #[test]
    fn test_load_heap_file_end_to_end() {
        let dir = tempdir().unwrap();
        let tsv = dir.path().join("title.basics.tsv");
        let heap = dir.path().join("movie.bin").to_string_lossy().into_owned();

        let mut f = File::create(&tsv).unwrap();
        writeln!(f, "tconst\ttitleType\tprimaryTitle").unwrap();
        for i in 0..250 {
            writeln!(f, "tt{:07}\tshort\tMovie {}", i, i).unwrap();
        }
        writeln!(f, "tt9999999\tshort\t\\N").unwrap();
        drop(f);

        let mut bm = BufferManager::new(8);
        let loaded = load_heap_file::<MovieRow, _>(
            &mut bm,
            tsv.to_str().unwrap(),
            &heap,
            movie_row_from_tsv,
        )
        .unwrap();
        assert_eq!(loaded, 250);

        bm.force().unwrap();
        // 104 movie rows per page, so 250 rows take 3 pages
        assert_eq!(bm.page_count(&heap), Some(3));
        let page = bm.get_page::<MovieRow>(2, &heap).unwrap();
        assert_eq!(page.num_records(), 250 - 2 * 104);
        assert_eq!(page.get_row(0).unwrap().title.to_string(), "Movie 208");
        bm.unpin_page(2, &heap);
    }
}
