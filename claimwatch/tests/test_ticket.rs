use claimwatch::ticket;
use std::fs;

mod common;

#[test]
fn tickets_never_collide_under_burst_creation() {
    let dir = tempfile::tempdir().unwrap();
    let mut created = Vec::new();
    for _ in 0..20 {
        created.push(ticket::create(dir.path()).unwrap());
    }
    created.sort();
    created.dedup();
    assert_eq!(created.len(), 20);
    assert_eq!(common::count_tickets(dir.path()), 20);
}

#[test]
fn consumption_is_oldest_first_and_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ticket_1700000005_1111.txt"), "run").unwrap();
    fs::write(dir.path().join("ticket_1700000001_2222.txt"), "run").unwrap();
    fs::write(dir.path().join("ticket_1700000003_3333.txt"), "run").unwrap();

    let mut order = Vec::new();
    while let Some(path) = ticket::next(dir.path()).unwrap() {
        assert!(ticket::claim(&path));
        order.push(path.file_name().unwrap().to_str().unwrap().to_string());
    }
    assert_eq!(
        order,
        vec![
            "ticket_1700000001_2222.txt",
            "ticket_1700000003_3333.txt",
            "ticket_1700000005_1111.txt",
        ]
    );
    assert_eq!(common::count_tickets(dir.path()), 0);
}
